use serde::Serialize;
use tracing::{error, warn};

type Predicate<'a> = Box<dyn Fn() -> bool + Send + 'a>;
type Fix<'a> = Box<dyn Fn() + Send + 'a>;

struct Check<'a> {
    name: &'static str,
    holds: Predicate<'a>,
    fix: Option<Fix<'a>>,
}

/// A violated check and whether its fix restored it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub name: &'static str,
    pub fixed: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    pub violations: Vec<Violation>,
}

impl Report {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// True if every violation was corrected.
    pub fn is_resolved(&self) -> bool {
        self.violations.iter().all(|violation| violation.fixed)
    }
}

/// Named predicates with optional corrections, evaluated together.
#[derive(Default)]
pub struct InvariantChecker<'a> {
    checks: Vec<Check<'a>>,
}

impl<'a> InvariantChecker<'a> {
    pub fn new() -> Self {
        Self { checks: Vec::new() }
    }

    /// Add a check that can only be reported.
    pub fn check(mut self, name: &'static str, holds: impl Fn() -> bool + Send + 'a) -> Self {
        self.checks.push(Check {
            name,
            holds: Box::new(holds),
            fix: None,
        });
        self
    }

    /// Add a check with a correction applied when it fails.
    pub fn check_or_fix(
        mut self,
        name: &'static str,
        holds: impl Fn() -> bool + Send + 'a,
        fix: impl Fn() + Send + 'a,
    ) -> Self {
        self.checks.push(Check {
            name,
            holds: Box::new(holds),
            fix: Some(Box::new(fix)),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Evaluate every check, fixing and re-checking the ones that fail.
    pub fn run(&self) -> Report {
        let mut report = Report::default();
        for check in &self.checks {
            if (check.holds)() {
                continue;
            }
            let fixed = match &check.fix {
                Some(fix) => {
                    fix();
                    (check.holds)()
                }
                None => false,
            };
            if fixed {
                warn!(invariant = check.name, "corrected drift");
            } else {
                error!(invariant = check.name, "invariant violated");
            }
            report.violations.push(Violation {
                name: check.name,
                fixed,
            });
        }
        report
    }
}
