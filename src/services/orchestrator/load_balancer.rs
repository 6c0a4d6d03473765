//! Load balancer (§4.4 "Load balancer"): selects one agent among eligible
//! candidates for a task.

use crate::domain::models::agent::{AgentInstance, AgentWorkload};
use crate::domain::models::task::{Priority, TaskDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingStrategy {
    RoundRobin,
    LeastLoaded,
    PerformanceBased,
    Adaptive,
}

impl SchedulingStrategy {
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "round_robin" => Some(Self::RoundRobin),
            "least_loaded" => Some(Self::LeastLoaded),
            "performance_based" => Some(Self::PerformanceBased),
            "adaptive" => Some(Self::Adaptive),
            _ => None,
        }
    }
}

pub struct Candidate<'a> {
    pub instance: &'a AgentInstance,
    pub workload: &'a AgentWorkload,
}

fn time_score(avg_execution_time_ms: f64) -> f64 {
    (1.0 - avg_execution_time_ms / 300_000.0).max(0.0)
}

/// The adaptive scoring formula from §4.4, computed for one candidate.
fn adaptive_score(candidate: &Candidate, task: &TaskDefinition, task_target_type: &str) -> f64 {
    let w = candidate.workload;
    let current_ratio = if w.max_concurrent == 0 {
        1.0
    } else {
        f64::from(w.current_tasks) / f64::from(w.max_concurrent)
    };
    let mut score = 0.3 * (1.0 - current_ratio)
        + 0.3 * w.performance_score
        + 0.2 * w.success_rate
        + 0.2 * time_score(w.avg_execution_time_ms);

    if candidate.instance.agent_type.as_str() == task_target_type {
        score += 0.1;
    }
    if matches!(task.priority, Priority::Critical | Priority::High) {
        score += 0.1 * w.performance_score;
    }
    score
}

/// Selects one candidate per `strategy`. Returns `None` for an empty
/// candidate set — the caller leaves the task queued (§8 boundary
/// behavior).
pub fn select<'a>(strategy: SchedulingStrategy, candidates: &'a [Candidate<'a>], task: &TaskDefinition, task_target_type: &str) -> Option<&'a Candidate<'a>> {
    if candidates.is_empty() {
        return None;
    }

    match strategy {
        SchedulingStrategy::RoundRobin => {
            candidates.iter().min_by_key(|c| (c.workload.selection_count, c.instance.id))
        }
        SchedulingStrategy::LeastLoaded => candidates
            .iter()
            .min_by(|a, b| {
                a.workload
                    .current_tasks
                    .cmp(&b.workload.current_tasks)
                    .then(a.instance.id.cmp(&b.instance.id))
            }),
        SchedulingStrategy::PerformanceBased => candidates.iter().max_by(|a, b| {
            a.workload
                .performance_score
                .partial_cmp(&b.workload.performance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.instance.id.cmp(&b.instance.id).reverse())
        }),
        SchedulingStrategy::Adaptive => {
            let mut best: Option<(&Candidate, f64)> = None;
            for c in candidates {
                let s = adaptive_score(c, task, task_target_type);
                best = match best {
                    None => Some((c, s)),
                    Some((cur_best, cur_score)) => {
                        if s > cur_score
                            || (s == cur_score
                                && (c.workload.selection_count, c.instance.id)
                                    < (cur_best.workload.selection_count, cur_best.instance.id))
                        {
                            Some((c, s))
                        } else {
                            Some((cur_best, cur_score))
                        }
                    }
                };
            }
            best.map(|(c, _)| c)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::agent::{AgentType, ContainerHandle};
    use crate::domain::models::task::AgentTypeFilter;

    fn instance(max_concurrent: u32, current_tasks: u32) -> AgentInstance {
        let spec = crate::domain::models::agent::AgentSpec::new("a", AgentType::Scraping, "img");
        let mut i = AgentInstance::launch(&spec, ContainerHandle("c".into()), max_concurrent);
        i.current_tasks = current_tasks;
        i
    }

    #[test]
    fn full_capacity_agent_never_selected_over_idle_one() {
        let busy = instance(3, 3);
        let idle = instance(3, 0);
        let mut busy_wl = AgentWorkload::new(3);
        busy_wl.current_tasks = 3;
        let idle_wl = AgentWorkload::new(3);

        let candidates = vec![
            Candidate { instance: &busy, workload: &busy_wl },
            Candidate { instance: &idle, workload: &idle_wl },
        ];
        let task = TaskDefinition::new("scrape", AgentTypeFilter::Exact("scraping".into()));

        for strategy in [
            SchedulingStrategy::RoundRobin,
            SchedulingStrategy::LeastLoaded,
            SchedulingStrategy::PerformanceBased,
            SchedulingStrategy::Adaptive,
        ] {
            let chosen = select(strategy, &candidates, &task, "scraping").unwrap();
            assert_eq!(chosen.instance.id, idle.id, "{strategy:?} picked the saturated agent");
        }
    }

    #[test]
    fn empty_candidates_returns_none() {
        let task = TaskDefinition::new("scrape", AgentTypeFilter::Any);
        let candidates: Vec<Candidate> = vec![];
        assert!(select(SchedulingStrategy::Adaptive, &candidates, &task, "scraping").is_none());
    }
}
