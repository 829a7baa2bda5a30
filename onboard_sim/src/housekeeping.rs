// housekeeping.rs: periodic housekeeping packets from the parameter store
use tmtc_protocol::{EntityKind, EntityRef};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, warn};

use crate::config::HousekeepingConfig;
use crate::engine::SimEngine;
use crate::errors::SimError;

/// Parameter names resolved once, before the loop starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HousekeepingPlan {
    pub structure_id: u32,
    pub period: Duration,
    pub parameters: Vec<u32>,
    pub counter: Option<u32>,
}

impl HousekeepingPlan {
    pub fn resolve(engine: &SimEngine, cfg: &HousekeepingConfig) -> Result<Self, SimError> {
        if cfg.period_ms == 0 {
            return Err(SimError::Housekeeping("period_ms must be positive".into()));
        }
        let model = engine.model();
        let lookup = |name: &str| model.resolve(EntityKind::Parameter, &EntityRef::from(name));
        let parameters = cfg
            .parameters
            .iter()
            .map(|name| lookup(name))
            .collect::<Result<Vec<_>, _>>()?;
        let counter = cfg.counter.as_deref().map(lookup).transpose()?;
        Ok(Self {
            structure_id: cfg.structure_id,
            period: Duration::from_millis(cfg.period_ms),
            parameters,
            counter,
        })
    }
}

/// One packet: bump the counter, then sample.
pub fn beat(engine: &SimEngine, plan: &HousekeepingPlan) -> Vec<u8> {
    if let Some(counter) = plan.counter {
        engine.increment(counter);
    }
    engine.sample(&plan.parameters)
}

pub fn spawn_housekeeping(engine: SimEngine, plan: HousekeepingPlan) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = time::interval(plan.period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            if !engine.is_online() {
                continue;
            }
            let data = beat(&engine, &plan);
            if data.is_empty() {
                warn!(structure_id = plan.structure_id, "housekeeping packet empty");
                continue;
            }
            debug!(structure_id = plan.structure_id, bytes = data.len(), "housekeeping");
            engine.publish_housekeeping(plan.structure_id, &data);
        }
    })
}
