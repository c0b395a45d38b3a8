//! RFC 5545 expansion through the external rule evaluator.
//!
//! Days that a month does not have are skipped, as the evaluator does.

use std::sync::Arc;

use tracing::trace;

use super::{CivilPlan, Instants, OccurrenceGenerator};
use crate::error::Result;
use crate::evaluator::RuleEvaluator;
use crate::model::RecurrenceDefinition;
use crate::rule::RecurrenceRule;
use crate::window::TimeWindow;

#[derive(Clone)]
pub struct StandardGenerator {
    evaluator: Arc<dyn RuleEvaluator>,
}

impl StandardGenerator {
    pub fn new(evaluator: Arc<dyn RuleEvaluator>) -> Self {
        Self { evaluator }
    }
}

impl OccurrenceGenerator for StandardGenerator {
    fn generate(
        &self,
        recurrence: &RecurrenceDefinition,
        rule: &RecurrenceRule,
        window: TimeWindow,
    ) -> Result<Instants> {
        let Some(plan) = CivilPlan::new(recurrence, window)? else {
            return Ok(Box::new(std::iter::empty()));
        };
        trace!(
            recurrence_id = %recurrence.id,
            civil_start = %plan.window_start,
            civil_end = %plan.window_end,
            "expanding rule"
        );
        let candidates =
            self.evaluator
                .expand(rule, plan.dtstart, plan.window_start, plan.window_end)?;
        Ok(plan.into_instants(candidates))
    }
}
