use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::{log_unavailable, AgentError, AgentLlm};
use crate::{profile::Profile, role::AgentRole};

/// One unit of analysis work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanItem {
    pub id: String,
    pub goal: String,
    pub plots: Vec<String>,
    pub priority: i64,
    pub columns: Vec<String>,
    pub notes: String,
}

fn strings(v: Option<&Value>) -> Vec<String> {
    match v {
        Some(Value::Array(items)) => items.iter().filter_map(|x| x.as_str().map(str::to_string)).collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

impl PlanItem {
    /// Lenient parse of one item in a model reply; `None` without a goal or id.
    pub fn from_value(v: &Value, position: usize) -> Option<Self> {
        let text = |k: &str| v.get(k).and_then(Value::as_str).unwrap_or_default().to_string();
        let id = match v.get("id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => format!("q{n}"),
            _ => format!("item_{}", position + 1),
        };
        let goal = text("goal");
        if goal.is_empty() && v.get("id").is_none() {
            return None;
        }
        Some(Self {
            id,
            goal,
            plots: strings(v.get("plots")),
            priority: v.get("priority").and_then(Value::as_i64).unwrap_or(position as i64 + 1),
            columns: strings(v.get("columns")),
            notes: text("notes"),
        })
    }
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, profile: &Profile, goal: &str, max_items: usize) -> Vec<PlanItem>;
}

pub struct LlmPlanner {
    llm: Arc<AgentLlm>,
}

impl LlmPlanner {
    pub fn new(llm: Arc<AgentLlm>) -> Self {
        Self { llm }
    }

    async fn ask(&self, profile: &Profile, goal: &str, max_items: usize) -> Result<Vec<PlanItem>, AgentError> {
        let request = json!({
            "role": "planner",
            "step": "plan",
            "profile": profile,
            "user_goal": goal,
            "constraints": {"max_items": max_items},
            "output_contract": "Return {\"eda_plan\":[{id,goal,plots,priority,columns,notes}]}",
        });
        let reply = self.llm.ask(AgentRole::Planner, &request).await?;
        let items: Vec<PlanItem> = reply
            .get("eda_plan")
            .and_then(Value::as_array)
            .map(|xs| xs.iter().enumerate().filter_map(|(i, x)| PlanItem::from_value(x, i)).collect())
            .unwrap_or_default();
        if items.is_empty() {
            return Err(AgentError::Parse("empty eda_plan".into()));
        }
        Ok(items.into_iter().take(max_items).collect())
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, profile: &Profile, goal: &str, max_items: usize) -> Vec<PlanItem> {
        match self.ask(profile, goal, max_items).await {
            Ok(items) => {
                info!(items = items.len(), "planner produced plan");
                items
            }
            Err(e) => {
                log_unavailable(AgentRole::Planner, &e);
                fallback_plan(profile, max_items)
            }
        }
    }
}

pub struct FallbackPlanner;

#[async_trait]
impl Planner for FallbackPlanner {
    async fn plan(&self, profile: &Profile, _goal: &str, max_items: usize) -> Vec<PlanItem> {
        fallback_plan(profile, max_items)
    }
}

/// Overview, numeric distributions, categorical breakdowns and correlations,
/// in that priority order.
pub fn fallback_plan(profile: &Profile, max_items: usize) -> Vec<PlanItem> {
    let mut items = Vec::new();
    let mut priority = 1;
    let mut push = |items: &mut Vec<PlanItem>, id: String, goal: String, plots: &[&str], columns: Vec<String>, notes: &str| {
        items.push(PlanItem {
            id,
            goal,
            plots: plots.iter().map(|p| p.to_string()).collect(),
            priority,
            columns,
            notes: notes.to_string(),
        });
        priority += 1;
    };

    let columns = &profile.columns;
    if !columns.is_empty() {
        push(
            &mut items,
            "data_overview".into(),
            "Basic data overview and missing values".into(),
            &["bar"],
            columns.iter().take(5).map(|c| c.name.clone()).collect(),
            "Check data completeness and basic structure",
        );
    }

    let numeric: Vec<&str> = columns.iter().filter(|c| c.is_numeric()).map(|c| c.name.as_str()).collect();
    for col in numeric.iter().take(3) {
        push(
            &mut items,
            format!("dist_{col}"),
            format!("Distribution analysis for {col}"),
            &["histogram", "boxplot"],
            vec![col.to_string()],
            "Check for skewness and outliers",
        );
    }

    let categorical = columns.iter().filter(|c| !c.is_numeric() && !c.top_values.is_empty());
    for col in categorical.take(2) {
        push(
            &mut items,
            format!("cat_{}", col.name),
            format!("Categorical analysis for {}", col.name),
            &["bar"],
            vec![col.name.clone()],
            "Check value distribution and cardinality",
        );
    }

    if numeric.len() >= 2 {
        push(
            &mut items,
            "correlations".into(),
            "Correlation analysis between numeric variables".into(),
            &["heatmap"],
            numeric.iter().take(5).map(|c| c.to_string()).collect(),
            "Identify strong correlations",
        );
    }

    items.truncate(max_items);
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dataset::{Column, Dataset},
        profile::profile,
    };

    fn sample_profile() -> Profile {
        let n = 30;
        profile(
            &Dataset::new(vec![
                Column::numeric("a", (0..n).map(|i| Some(i as f64)).collect()),
                Column::numeric("b", (0..n).map(|i| Some((i * 2) as f64)).collect()),
                Column::categorical("c", (0..n).map(|i| Some(["x", "y"][i % 2])).collect()),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn fallback_plan_shape() {
        let plan = fallback_plan(&sample_profile(), 8);
        let ids: Vec<&str> = plan.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["data_overview", "dist_a", "dist_b", "cat_c", "correlations"]);
        assert_eq!(plan[1].plots, ["histogram", "boxplot"]);
        assert_eq!(plan[4].columns, ["a", "b"]);
        let priorities: Vec<i64> = plan.iter().map(|p| p.priority).collect();
        assert_eq!(priorities, [1, 2, 3, 4, 5]);
    }

    #[test]
    fn fallback_plan_respects_max_items() {
        assert_eq!(fallback_plan(&sample_profile(), 2).len(), 2);
        assert!(fallback_plan(&sample_profile(), 0).is_empty());
    }

    #[test]
    fn lenient_item_parse() {
        let v = serde_json::json!({"id": 3, "goal": "g", "plots": "histogram", "priority": "high"});
        let item = PlanItem::from_value(&v, 0).unwrap();
        assert_eq!(item.id, "q3");
        assert_eq!(item.plots, ["histogram"]);
        assert_eq!(item.priority, 1);
        assert!(PlanItem::from_value(&serde_json::json!({"plots": []}), 0).is_none());
    }

    #[tokio::test]
    async fn llm_planner_falls_back_offline() {
        let llm = Arc::new(AgentLlm::offline(&crate::config::Config::defaults()));
        let plan = LlmPlanner::new(llm).plan(&sample_profile(), "General EDA", 8).await;
        assert_eq!(plan, fallback_plan(&sample_profile(), 8));
    }
}
