//! The orchestrator: runs every stage in order over a set of catalogs.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    fmt,
    sync::Arc,
};

use crossbeam_channel::{bounded, RecvTimeoutError};
use indicatif::ProgressBar;
use log::{debug, info, warn};
use rayon::prelude::*;

use crate::{
    config::CorrelationConfig,
    correlation::{CorrelatedSet, CorrelationSummary, FluxCorrelationAnalyzer},
    error::{ConfigError, PipelineError, RecordError},
    light_curve::{LightCurve, LightCurveBuilder},
    matching::{CrossMatch, PositionMatch, PositionMatcher, TimeWindowMatcher},
    observation::{Catalog, Observation, RawObservation},
    quality::{QualityFlag, QualityValidator},
};

/// The stages of a run. A run only ever moves forward, one stage at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PipelineState {
    Loaded,
    PositionMatched,
    TimeMatched,
    FluxCorrelated,
    LightCurvesBuilt,
    Validated,
    Emitted,
}

impl PipelineState {
    pub const ALL: [PipelineState; 7] = [
        PipelineState::Loaded,
        PipelineState::PositionMatched,
        PipelineState::TimeMatched,
        PipelineState::FluxCorrelated,
        PipelineState::LightCurvesBuilt,
        PipelineState::Validated,
        PipelineState::Emitted,
    ];

    pub fn next(self) -> Option<Self> {
        use PipelineState::*;
        match self {
            Loaded => Some(PositionMatched),
            PositionMatched => Some(TimeMatched),
            TimeMatched => Some(FluxCorrelated),
            FluxCorrelated => Some(LightCurvesBuilt),
            LightCurvesBuilt => Some(Validated),
            Validated => Some(Emitted),
            Emitted => None,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Loaded => "loaded",
            PipelineState::PositionMatched => "position matched",
            PipelineState::TimeMatched => "time matched",
            PipelineState::FluxCorrelated => "flux correlated",
            PipelineState::LightCurvesBuilt => "light curves built",
            PipelineState::Validated => "validated",
            PipelineState::Emitted => "emitted",
        };
        write!(f, "{s}")
    }
}

/// Bookkeeping for a run, returned alongside the results.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Every record that failed validation, in catalog order.
    pub rejected: Vec<RecordError>,

    /// The stages the run went through, in order.
    pub states: Vec<PipelineState>,

    pub observations_loaded: usize,
    pub position_matches: usize,

    /// Position matches dropped because they fell outside the time window.
    pub outside_time_window: usize,

    pub cross_matches: usize,

    /// Distinct primaries among the matches without any target label. These
    /// are all correlated as one set, so more than one means unrelated
    /// sources may share a coefficient.
    pub untargeted_primaries: usize,

    pub light_curves: usize,
    pub quality_flags: usize,
}

/// Everything a run produces. Plain data; serialise it however you like.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Ordered by catalog pair (i < j, in the order the catalogs were given),
    /// then by primary, then by time delta.
    pub matches: Vec<CrossMatch>,

    /// One summary per correlation set. Matches without any target label
    /// are analysed together under `None`.
    pub correlations: BTreeMap<Option<String>, CorrelationSummary>,

    pub light_curves: BTreeMap<String, LightCurve>,

    /// `match_index` refers to `matches`.
    pub flags: Vec<QualityFlag>,

    pub report: RunReport,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    config: CorrelationConfig,
    position: PositionMatcher,
    time: TimeWindowMatcher,
    flux: FluxCorrelationAnalyzer,
    light_curves: LightCurveBuilder,
    quality: QualityValidator,
    progress: Option<ProgressBar>,
}

impl Pipeline {
    /// Fails if the configuration is unusable; nothing has been processed at
    /// that point.
    pub fn new(config: CorrelationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            position: PositionMatcher::new(&config),
            time: TimeWindowMatcher::new(&config),
            flux: FluxCorrelationAnalyzer::new(&config),
            light_curves: LightCurveBuilder::new(&config),
            quality: QualityValidator::new(&config),
            config,
            progress: None,
        })
    }

    /// Advance `progress_bar` by one for every stage entered.
    pub fn with_progress_bar(mut self, progress_bar: ProgressBar) -> Self {
        progress_bar.set_length(PipelineState::ALL.len() as u64);
        self.progress = Some(progress_bar);
        self
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Run every stage over the named catalogs. Every ordered pair of catalogs
    /// (i < j) is cross-matched with catalog i supplying the primaries.
    ///
    /// Bad records are skipped and listed in the report; the only error is
    /// being given fewer than two catalogs.
    pub fn run<S: Into<String>>(
        &self,
        catalogs: Vec<(S, Vec<RawObservation>)>,
    ) -> Result<PipelineOutput, ConfigError> {
        if catalogs.len() < 2 {
            return Err(ConfigError::TooFewCatalogs(catalogs.len()));
        }
        let mut report = RunReport::default();

        let catalogs: Vec<Catalog> = catalogs
            .into_iter()
            .map(|(name, records)| {
                let (catalog, rejected) = Catalog::ingest(name, records);
                report.rejected.extend(rejected);
                catalog
            })
            .collect();
        report.observations_loaded = catalogs.iter().map(Catalog::len).sum();
        self.enter(&mut report, PipelineState::Loaded);

        let position_matches = self.match_positions(&catalogs);
        report.position_matches = position_matches.iter().map(Vec::len).sum();
        self.enter(&mut report, PipelineState::PositionMatched);

        // Windowed one catalog pair at a time, so pairs stay contiguous.
        let timed: Vec<CrossMatch> = position_matches
            .into_iter()
            .flat_map(|pair_matches| self.time.apply(pair_matches))
            .collect();
        report.outside_time_window = report.position_matches - timed.len();
        report.cross_matches = timed.len();
        self.enter(&mut report, PipelineState::TimeMatched);

        report.untargeted_primaries = untargeted_primaries(&timed);
        if report.untargeted_primaries > 1 {
            warn!(
                "{} unlabelled primaries are correlated as a single set",
                report.untargeted_primaries
            );
        }
        let (matches, correlations) = self.correlate(&timed);
        self.enter(&mut report, PipelineState::FluxCorrelated);

        let light_curves = self.build_light_curves(&catalogs, &matches);
        report.light_curves = light_curves.len();
        self.enter(&mut report, PipelineState::LightCurvesBuilt);

        let flags = self.quality.validate(&matches);
        report.quality_flags = flags.len();
        self.enter(&mut report, PipelineState::Validated);

        info!(
            "{} observations loaded ({} rejected), {} cross-matches, {} light curves, {} quality flags",
            report.observations_loaded,
            report.rejected.len(),
            report.cross_matches,
            report.light_curves,
            report.quality_flags
        );
        self.enter(&mut report, PipelineState::Emitted);
        if let Some(progress) = &self.progress {
            progress.finish();
        }

        Ok(PipelineOutput {
            matches,
            correlations,
            light_curves,
            flags,
            report,
        })
    }

    /// [`Self::run`] on a worker thread, giving up on it after `timeout`. The
    /// worker isn't stopped; its result is just discarded.
    pub fn run_with_timeout(
        &self,
        catalogs: Vec<(String, Vec<RawObservation>)>,
        timeout: std::time::Duration,
    ) -> Result<PipelineOutput, PipelineError> {
        let (tx, rx) = bounded(1);
        let pipeline = self.clone();
        std::thread::spawn(move || {
            // Nobody is listening any more if the caller already timed out.
            let _ = tx.send(pipeline.run(catalogs));
        });

        match rx.recv_timeout(timeout) {
            Ok(result) => Ok(result?),
            Err(RecvTimeoutError::Timeout) => Err(PipelineError::TimedOut(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(PipelineError::WorkerLost),
        }
    }

    fn enter(&self, report: &mut RunReport, state: PipelineState) {
        debug_assert_eq!(
            report.states.last().and_then(|s| s.next()),
            if state == PipelineState::Loaded {
                None
            } else {
                Some(state)
            }
        );
        debug!("Pipeline {state}");
        report.states.push(state);
        if let Some(progress) = &self.progress {
            progress.set_message(state.to_string());
            progress.inc(1);
        }
    }

    /// Position matches of every catalog pair, one list per pair.
    fn match_positions(&self, catalogs: &[Catalog]) -> Vec<Vec<PositionMatch>> {
        let mut matches = vec![];
        for (i, primaries) in catalogs.iter().enumerate() {
            for secondaries in &catalogs[i + 1..] {
                let found = self
                    .position
                    .match_catalogs(primaries.observations(), secondaries.observations());
                info!(
                    "{} x {}: {} position matches",
                    primaries.name(),
                    secondaries.name(),
                    found.len()
                );
                matches.push(found);
            }
        }
        matches
    }

    /// Analyse each target's matches as one set and put the coefficients back
    /// on the matches, keeping their order.
    fn correlate(
        &self,
        matches: &[CrossMatch],
    ) -> (Vec<CrossMatch>, BTreeMap<Option<String>, CorrelationSummary>) {
        let mut sets: BTreeMap<Option<String>, Vec<usize>> = BTreeMap::new();
        for (i, m) in matches.iter().enumerate() {
            sets.entry(m.target().map(str::to_string)).or_default().push(i);
        }

        let analysed: Vec<(Option<String>, Vec<usize>, CorrelatedSet)> = sets
            .into_par_iter()
            .map(|(target, indices)| {
                let members: Vec<CrossMatch> =
                    indices.iter().map(|&i| matches[i].clone()).collect();
                let set = self.flux.analyze(&members);
                (target, indices, set)
            })
            .collect();

        let mut correlated: Vec<(usize, CrossMatch)> = Vec::with_capacity(matches.len());
        let mut summaries = BTreeMap::new();
        for (target, indices, set) in analysed {
            if set.summary.correlated_variability {
                info!(
                    "Correlated variability for {}: r = {:.3}",
                    target.as_deref().unwrap_or("untargeted matches"),
                    set.summary.coefficient.unwrap_or_default()
                );
            }
            correlated.extend(indices.into_iter().zip(set.matches));
            summaries.insert(target, set.summary);
        }
        correlated.sort_unstable_by_key(|(i, _)| *i);

        (correlated.into_iter().map(|(_, m)| m).collect(), summaries)
    }

    /// One light curve per target label found on any observation or match.
    /// Targets are built in parallel; each curve is sorted only once all of
    /// its inputs are in hand.
    fn build_light_curves(
        &self,
        catalogs: &[Catalog],
        matches: &[CrossMatch],
    ) -> BTreeMap<String, LightCurve> {
        let mut observations: BTreeMap<&str, Vec<Arc<Observation>>> = BTreeMap::new();
        for obs in catalogs.iter().flat_map(|c| c.observations()) {
            if let Some(target) = obs.target() {
                observations.entry(target).or_default().push(Arc::clone(obs));
            }
        }
        let mut target_matches: BTreeMap<&str, Vec<CrossMatch>> = BTreeMap::new();
        for m in matches {
            if let Some(target) = m.target() {
                target_matches.entry(target).or_default().push(m.clone());
            }
        }
        let targets: Vec<&str> = observations
            .keys()
            .chain(target_matches.keys())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        targets
            .into_par_iter()
            .filter_map(|target| {
                let lc = self.light_curves.build(
                    target,
                    target_matches.get(target).map_or(&[][..], Vec::as_slice),
                    observations.get(target).map_or(&[][..], Vec::as_slice),
                )?;
                Some((target.to_string(), lc))
            })
            .collect()
    }
}

fn untargeted_primaries(matches: &[CrossMatch]) -> usize {
    matches
        .iter()
        .filter(|m| m.target().is_none())
        .map(|m| Arc::as_ptr(&m.primary))
        .collect::<HashSet<_>>()
        .len()
}
