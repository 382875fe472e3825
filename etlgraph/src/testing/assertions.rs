//! Test assertions for plans, issues and reports.

use crate::core::{Issue, IssueCode, ResolutionStatus, Severity};
use crate::planner::ExecutionPlan;
use crate::resolution::BreakDecision;

/// Asserts that the plan has exactly the given stages.
pub fn assert_plan_stages(plan: &ExecutionPlan, expected: &[&[&str]]) {
    let actual = plan.as_lists();
    let expected: Vec<Vec<&str>> = expected.iter().map(|stage| stage.to_vec()).collect();
    assert_eq!(actual, expected, "Unexpected execution stages");
}

/// Asserts that an issue with the code and severity was raised, and returns
/// the first match.
pub fn assert_has_issue<'a>(issues: &'a [Issue], code: IssueCode, severity: Severity) -> &'a Issue {
    let found = issues
        .iter()
        .find(|issue| issue.code == code && issue.severity == severity);
    match found {
        Some(issue) => issue,
        None => panic!(
            "Expected a {severity:?} {code} issue, got: {:?}",
            issues
                .iter()
                .map(|i| format!("{:?} {}", i.severity, i.code))
                .collect::<Vec<_>>()
        ),
    }
}

/// Asserts that no issue is blocking.
pub fn assert_no_blocking_issues(issues: &[Issue]) {
    let blocking: Vec<&Issue> = issues.iter().filter(|i| i.is_blocking()).collect();
    assert!(
        blocking.is_empty(),
        "Expected no blocking issues, got: {blocking:?}"
    );
}

/// Asserts a cycle decision's status and, when given, the removed edge label.
pub fn assert_decision(decision: &BreakDecision, status: ResolutionStatus, edge: Option<&str>) {
    assert_eq!(
        decision.status, status,
        "Unexpected status for cycle {}",
        decision.cycle.label()
    );
    assert_eq!(
        decision.break_point.as_ref().map(|bp| bp.edge.label()).as_deref(),
        edge,
        "Unexpected break edge for cycle {}",
        decision.cycle.label()
    );
}
