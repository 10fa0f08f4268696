//! Response Composer
//!
//! Turns a free-text request and a mode into the assistant's reply and a
//! resolved [`Plan`]. The engine never sees the text; it only receives
//! the plan built here.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::model::{ExecutionPhase, Mode, Plan, Step, StepCategory};

/// Keyword that selects the failing checkout scenario.
const FAILURE_KEYWORD: &str = "orange";

/// Greeting shown before the first request.
pub const GREETING: &str = "Tell me what you want to test. I can guide you step by step, \
or run it autonomously and show you the execution.";

/// The assistant's answer to one request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AssistantResponse {
    pub reply: String,
    pub plan: Plan,
}

fn success_steps() -> Vec<Step> {
    vec![
        Step::new("Locate product", "Finding the product on the page")
            .with_category(StepCategory::Search),
        Step::new("Find CTA", "Locating the Add to Cart button").with_category(StepCategory::View),
        Step::new("Click button", "Adding item to cart").with_category(StepCategory::Click),
        Step::new("Verify cart", "Ensuring item appears in cart")
            .with_category(StepCategory::Action),
    ]
}

fn failure_steps() -> Vec<Step> {
    vec![
        Step::new("Locate product", "Product 'Orange' found on category page")
            .with_category(StepCategory::Search),
        Step::new("Find CTA", "Add to Cart button is disabled")
            .with_category(StepCategory::View)
            .failing(),
    ]
}

/// Returns true if the request should exercise the failing scenario.
pub fn is_failure_scenario(content: &str) -> bool {
    content.to_lowercase().contains(FAILURE_KEYWORD)
}

/// Composes the assistant's reply and plan for a request.
///
/// # Example
///
/// ```
/// use flowpilot::workflow::{compose_response, Mode, Plan};
///
/// let response = compose_response("add an orange to my cart", Mode::Autonomous);
/// match response.plan {
///     Plan::Autonomous { phases, .. } => assert_eq!(phases.len(), 2),
///     Plan::Guided { .. } => unreachable!(),
/// }
/// ```
pub fn compose_response(content: &str, mode: Mode) -> AssistantResponse {
    let failing = is_failure_scenario(content);
    let steps = if failing { failure_steps() } else { success_steps() };

    debug!(
        "Composing {} response ({} scenario) for: {}",
        mode,
        if failing { "failure" } else { "success" },
        content.trim()
    );

    let plan = match mode {
        Mode::Guided => {
            let title = if failing {
                "Add orange to cart"
            } else {
                "Add item to cart"
            };
            Plan::guided(title, steps)
        }
        Mode::Autonomous => Plan::autonomous(split_into_phases(steps, failing)),
    };

    let reply = match (failing, mode) {
        (true, Mode::Autonomous) => {
            "I'll attempt this autonomously. I'll stop if any validation fails and explain why."
        }
        (true, Mode::Guided) => "Let's try this together. I'll stop if something doesn't look right.",
        (false, Mode::Autonomous) => {
            "Here's the execution plan. I'll run this and surface results at each stage."
        }
        (false, Mode::Guided) => "We'll go step by step and validate as we go.",
    };

    info!(
        "Composed {} plan with {} phase(s)",
        plan.mode(),
        plan.phases().len()
    );

    AssistantResponse {
        reply: reply.to_string(),
        plan,
    }
}

/// Splits a flat step list into the autonomous phase layout.
fn split_into_phases(mut steps: Vec<Step>, failing: bool) -> Vec<ExecutionPhase> {
    let layout: &[(&str, &str, usize)] = if failing {
        &[("prep", "Preparation", 1), ("action", "Action", 1)]
    } else {
        &[
            ("prep", "Preparation", 2),
            ("action", "Action", 1),
            ("validation", "Validation", 1),
        ]
    };

    let mut phases = Vec::with_capacity(layout.len());
    for (id, title, count) in layout {
        let take = (*count).min(steps.len());
        let chunk: Vec<Step> = steps.drain(..take).collect();
        phases.push(ExecutionPhase::new(*id, *title, chunk));
    }
    phases
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_keyword_case_insensitive() {
        assert!(is_failure_scenario("Add an ORANGE to cart"));
        assert!(!is_failure_scenario("Add a banana to cart"));
    }

    #[test]
    fn test_guided_success_plan() {
        let response = compose_response("add milk to cart", Mode::Guided);
        match &response.plan {
            Plan::Guided { title, steps, .. } => {
                assert_eq!(title, "Add item to cart");
                assert_eq!(steps.len(), 4);
                assert!(steps.iter().all(|s| !s.fail_flag));
            }
            other => panic!("expected guided plan, got {:?}", other),
        }
        assert_eq!(response.reply, "We'll go step by step and validate as we go.");
    }

    #[test]
    fn test_guided_failure_plan() {
        let response = compose_response("add orange", Mode::Guided);
        match &response.plan {
            Plan::Guided { title, steps, .. } => {
                assert_eq!(title, "Add orange to cart");
                assert_eq!(steps.len(), 2);
                assert!(steps[1].fail_flag);
            }
            other => panic!("expected guided plan, got {:?}", other),
        }
    }

    #[test]
    fn test_autonomous_success_phases() {
        let response = compose_response("add milk to cart", Mode::Autonomous);
        let phases = response.plan.phases();

        let ids: Vec<&str> = phases.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["prep", "action", "validation"]);
        let sizes: Vec<usize> = phases.iter().map(|p| p.steps.len()).collect();
        assert_eq!(sizes, vec![2, 1, 1]);
    }

    #[test]
    fn test_autonomous_failure_phases() {
        let response = compose_response("orange please", Mode::Autonomous);
        let phases = response.plan.phases();

        assert_eq!(phases.len(), 2);
        assert!(!phases[0].has_failing_step());
        assert!(phases[1].has_failing_step());
        assert_eq!(phases[1].steps[0].text, "Find CTA");
    }

    #[test]
    fn test_composed_plans_validate() {
        for content in ["add milk", "add orange"] {
            for mode in [Mode::Guided, Mode::Autonomous] {
                let response = compose_response(content, mode);
                assert!(crate::workflow::validate_plan(&response.plan).is_ok());
            }
        }
    }
}
