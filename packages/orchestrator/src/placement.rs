// ABOUTME: Placement of new managed resources onto compute targets
// ABOUTME: Pluggable strategy trait with a capacity-aware, cost-ordered default

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use stratus_storage::{ResourceConfig, ResourceType, SizeClass};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementTarget {
    pub id: String,
    pub region: String,
    pub capacity_units: u32,
    pub used_units: u32,
    /// Hourly cost of one capacity unit
    pub cost_per_unit: f64,
}

impl PlacementTarget {
    pub fn new(id: &str, region: &str, capacity_units: u32, cost_per_unit: f64) -> Self {
        Self {
            id: id.to_string(),
            region: region.to_string(),
            capacity_units,
            used_units: 0,
            cost_per_unit,
        }
    }

    pub fn headroom(&self) -> u32 {
        self.capacity_units.saturating_sub(self.used_units)
    }
}

/// Capacity `replicas` instances of a size class occupy. `None` when the count overflows.
pub fn units_for(size: SizeClass, replicas: u32) -> Option<u32> {
    size.capacity_units().checked_mul(replicas.max(1))
}

/// Capacity a resource needs: size class units times replicas
pub fn required_units(config: &ResourceConfig) -> Option<u32> {
    units_for(config.size, config.replicas)
}

pub trait PlacementStrategy: Send + Sync {
    /// Pick and reserve a target for the resource, or `None` when nothing fits
    fn select(&self, resource_type: ResourceType, config: &ResourceConfig)
        -> Option<PlacementTarget>;

    /// Return capacity reserved by `select`
    fn release(&self, target_id: &str, units: u32);

    /// Adjust a reservation after scaling. Returns false when the target cannot absorb the growth.
    fn resize(&self, target_id: &str, from_units: u32, to_units: u32) -> bool;

    /// Record units already held on a target, e.g. by resources loaded after a restart.
    /// Returns false when the target is unknown.
    fn reserve(&self, target_id: &str, units: u32) -> bool;
}

/// Cheapest target with enough free capacity wins; ties go to the emptiest target.
pub struct CapacityAwarePlacement {
    targets: Mutex<Vec<PlacementTarget>>,
}

impl CapacityAwarePlacement {
    pub fn new(targets: Vec<PlacementTarget>) -> Self {
        Self {
            targets: Mutex::new(targets),
        }
    }

    pub fn targets(&self) -> Vec<PlacementTarget> {
        self.targets
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }
}

impl Default for CapacityAwarePlacement {
    fn default() -> Self {
        Self::new(vec![PlacementTarget::new("local-1", "local", 64, 1.0)])
    }
}

impl PlacementStrategy for CapacityAwarePlacement {
    fn select(
        &self,
        resource_type: ResourceType,
        config: &ResourceConfig,
    ) -> Option<PlacementTarget> {
        let units = required_units(config)?;
        let mut targets = self.targets.lock().unwrap_or_else(|e| e.into_inner());

        let chosen = targets
            .iter_mut()
            .filter(|t| t.headroom() >= units)
            .min_by(|a, b| {
                a.cost_per_unit
                    .total_cmp(&b.cost_per_unit)
                    .then(b.headroom().cmp(&a.headroom()))
            })?;

        chosen.used_units += units;
        debug!(
            "Placed {} resource '{}' on {} ({} units, {} free)",
            resource_type.as_str(),
            config.name,
            chosen.id,
            units,
            chosen.headroom()
        );
        Some(chosen.clone())
    }

    fn release(&self, target_id: &str, units: u32) {
        let mut targets = self.targets.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(target) = targets.iter_mut().find(|t| t.id == target_id) {
            target.used_units = target.used_units.saturating_sub(units);
        }
    }

    fn resize(&self, target_id: &str, from_units: u32, to_units: u32) -> bool {
        let mut targets = self.targets.lock().unwrap_or_else(|e| e.into_inner());
        let Some(target) = targets.iter_mut().find(|t| t.id == target_id) else {
            return true;
        };
        if to_units > from_units && target.headroom() < to_units - from_units {
            return false;
        }
        target.used_units = target
            .used_units
            .saturating_sub(from_units)
            .saturating_add(to_units);
        true
    }

    fn reserve(&self, target_id: &str, units: u32) -> bool {
        let mut targets = self.targets.lock().unwrap_or_else(|e| e.into_inner());
        match targets.iter_mut().find(|t| t.id == target_id) {
            Some(target) => {
                target.used_units = target.used_units.saturating_add(units);
                true
            }
            None => false,
        }
    }
}
