use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Severity of a reported issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportLevel {
    Ignore,
    Warning,
    Issue,
    Critical,
}

impl fmt::Display for ReportLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReportLevel::Ignore => "ignore",
            ReportLevel::Warning => "warning",
            ReportLevel::Issue => "issue",
            ReportLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Every issue the engine can raise, mapped 1-to-1 onto report codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueId {
    // Loader.
    ScenarioFileMalformed,
    UnknownActionType,
    MissingMandatoryField,
    IncludeNotFound,
    MultipleActionScenarios,
    // Runtime scheduling.
    ScenarioActionExecutionError,
    ScenarioActionTimeout,
    StateChangeFailure,
    // Observational.
    QueryPositionOutOfSegment,
    QueryPositionSuperiorDuration,
    EventSeekResultPositionWrong,
    EventSeekNotHandled,
    ConfigLatencyTooHigh,
    ConfigTooManyBuffersDropped,
    ScenarioNotEnded,
}

impl IssueId {
    /// Wire name, identical to the serde kebab-case rendering.
    pub fn code(&self) -> &'static str {
        match self {
            IssueId::ScenarioFileMalformed => "scenario-file-malformed",
            IssueId::UnknownActionType => "unknown-action-type",
            IssueId::MissingMandatoryField => "missing-mandatory-field",
            IssueId::IncludeNotFound => "include-not-found",
            IssueId::MultipleActionScenarios => "multiple-action-scenarios",
            IssueId::ScenarioActionExecutionError => "scenario-action-execution-error",
            IssueId::ScenarioActionTimeout => "scenario-action-timeout",
            IssueId::StateChangeFailure => "state-change-failure",
            IssueId::QueryPositionOutOfSegment => "query-position-out-of-segment",
            IssueId::QueryPositionSuperiorDuration => "query-position-superior-duration",
            IssueId::EventSeekResultPositionWrong => "event-seek-result-position-wrong",
            IssueId::EventSeekNotHandled => "event-seek-not-handled",
            IssueId::ConfigLatencyTooHigh => "config-latency-too-high",
            IssueId::ConfigTooManyBuffersDropped => "config-too-many-buffers-dropped",
            IssueId::ScenarioNotEnded => "scenario-not-ended",
        }
    }

    pub fn default_level(&self) -> ReportLevel {
        match self {
            IssueId::ScenarioFileMalformed
            | IssueId::UnknownActionType
            | IssueId::MissingMandatoryField
            | IssueId::IncludeNotFound
            | IssueId::MultipleActionScenarios
            | IssueId::ScenarioActionExecutionError
            | IssueId::StateChangeFailure
            | IssueId::ScenarioNotEnded => ReportLevel::Critical,
            IssueId::QueryPositionOutOfSegment
            | IssueId::QueryPositionSuperiorDuration
            | IssueId::EventSeekResultPositionWrong
            | IssueId::EventSeekNotHandled
            | IssueId::ConfigLatencyTooHigh
            | IssueId::ConfigTooManyBuffersDropped => ReportLevel::Critical,
            IssueId::ScenarioActionTimeout => ReportLevel::Issue,
        }
    }
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One emitted report event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub issue: IssueId,
    pub level: ReportLevel,
    pub message: String,
    /// Name of the reporting scenario.
    pub reporter: String,
}

/// Consumer of report events. The aggregator behind this trait is an
/// external collaborator; the engine only pushes.
pub trait ReportSink: Send + Sync {
    fn report(&self, report: Report);
}

/// Sink that drops the structured report; the [`Reporter`] has already
/// logged it through `tracing`.
#[derive(Debug, Default)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn report(&self, _report: Report) {}
}

/// Sink that stores everything, for tests and the CLI.
#[derive(Debug, Default)]
pub struct CollectingSink {
    reports: Mutex<Vec<Report>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().expect("report sink poisoned").clone()
    }

    pub fn count(&self, issue: IssueId) -> usize {
        self.reports
            .lock()
            .expect("report sink poisoned")
            .iter()
            .filter(|r| r.issue == issue)
            .count()
    }
}

impl ReportSink for CollectingSink {
    fn report(&self, report: Report) {
        self.reports.lock().expect("report sink poisoned").push(report);
    }
}

/// Which levels abort the run, and which get printed. Parsed from the
/// `VERISTREAM_FLAGS` environment value, e.g.
/// `fatal_issues,print_warnings`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FatalityFlags {
    pub fatal_criticals: bool,
    pub fatal_issues: bool,
    pub fatal_warnings: bool,
    pub print_criticals: bool,
    pub print_issues: bool,
    pub print_warnings: bool,
}

impl FatalityFlags {
    pub fn parse(s: &str) -> Self {
        let mut flags = Self::default();
        for key in s.split([',', ' ']).map(str::trim).filter(|k| !k.is_empty()) {
            match key {
                "fatal_criticals" => flags.fatal_criticals = true,
                "fatal_issues" => flags.fatal_issues = true,
                "fatal_warnings" => flags.fatal_warnings = true,
                "print_criticals" => flags.print_criticals = true,
                "print_issues" => flags.print_issues = true,
                "print_warnings" => flags.print_warnings = true,
                other => warn!(flag = other, "unknown fatality flag"),
            }
        }
        flags
    }

    pub fn is_fatal(&self, level: ReportLevel) -> bool {
        match level {
            ReportLevel::Critical => self.fatal_criticals,
            ReportLevel::Issue => self.fatal_issues,
            ReportLevel::Warning => self.fatal_warnings,
            ReportLevel::Ignore => false,
        }
    }
}

/// Shared reporting handle: applies severity overrides, logs, forwards to
/// the sink and tracks whether a fatal level was hit.
#[derive(Clone)]
pub struct Reporter {
    inner: Arc<ReporterInner>,
}

struct ReporterInner {
    name: String,
    sink: Arc<dyn ReportSink>,
    flags: FatalityFlags,
    overrides: Mutex<HashMap<IssueId, ReportLevel>>,
    fatal_triggered: AtomicBool,
}

impl Reporter {
    pub fn new(name: impl Into<String>, sink: Arc<dyn ReportSink>, flags: FatalityFlags) -> Self {
        Self {
            inner: Arc::new(ReporterInner {
                name: name.into(),
                sink,
                flags,
                overrides: Mutex::new(HashMap::new()),
                fatal_triggered: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Force `issue` to be reported at `level` instead of its default.
    pub fn set_severity_override(&self, issue: IssueId, level: ReportLevel) {
        self.inner
            .overrides
            .lock()
            .expect("override table poisoned")
            .insert(issue, level);
    }

    pub fn report(&self, issue: IssueId, message: impl Into<String>) {
        self.report_at(issue, issue.default_level(), message);
    }

    /// Report at an explicit level; severity overrides still win.
    pub fn report_at(&self, issue: IssueId, level: ReportLevel, message: impl Into<String>) {
        let message = message.into();
        let level = self
            .inner
            .overrides
            .lock()
            .expect("override table poisoned")
            .get(&issue)
            .copied()
            .unwrap_or(level);

        match level {
            ReportLevel::Critical => error!(issue = %issue, "{message}"),
            ReportLevel::Issue => warn!(issue = %issue, "{message}"),
            ReportLevel::Warning => info!(issue = %issue, "{message}"),
            ReportLevel::Ignore => return,
        }

        if self.inner.flags.is_fatal(level) {
            self.inner.fatal_triggered.store(true, Ordering::Release);
        }

        self.inner.sink.report(Report {
            issue,
            level,
            message,
            reporter: self.inner.name.clone(),
        });
    }

    /// True once any report crossed a fatal level per the global flags.
    pub fn is_fatal_triggered(&self) -> bool {
        self.inner.fatal_triggered.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_downgrade_and_upgrade() {
        let sink = CollectingSink::new();
        let reporter = Reporter::new("s", sink.clone(), FatalityFlags::default());
        reporter.set_severity_override(IssueId::ScenarioActionTimeout, ReportLevel::Critical);
        reporter.report(IssueId::ScenarioActionTimeout, "slow");
        let reports = sink.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].level, ReportLevel::Critical);
    }

    #[test]
    fn ignore_override_drops_the_report() {
        let sink = CollectingSink::new();
        let reporter = Reporter::new("s", sink.clone(), FatalityFlags::default());
        reporter.set_severity_override(IssueId::QueryPositionOutOfSegment, ReportLevel::Ignore);
        reporter.report(IssueId::QueryPositionOutOfSegment, "out");
        assert!(sink.reports().is_empty());
    }

    #[test]
    fn fatality_flags_trip_the_reporter() {
        let sink = CollectingSink::new();
        let flags = FatalityFlags::parse("fatal_issues");
        let reporter = Reporter::new("s", sink, flags);
        assert!(!reporter.is_fatal_triggered());
        reporter.report_at(IssueId::ScenarioActionTimeout, ReportLevel::Issue, "slow");
        assert!(reporter.is_fatal_triggered());
    }

    #[test]
    fn flags_parse_mixed_separators() {
        let flags = FatalityFlags::parse("fatal_criticals, print_issues fatal_warnings");
        assert!(flags.fatal_criticals);
        assert!(flags.fatal_warnings);
        assert!(flags.print_issues);
        assert!(!flags.fatal_issues);
    }

    #[test]
    fn issue_codes_are_kebab_case() {
        assert_eq!(
            IssueId::QueryPositionOutOfSegment.code(),
            "query-position-out-of-segment"
        );
        assert_eq!(
            serde_json::to_string(&IssueId::ScenarioNotEnded).unwrap(),
            "\"scenario-not-ended\""
        );
    }
}
