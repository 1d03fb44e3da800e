// ABOUTME: Shared utility functions for Stratus
// ABOUTME: Prefixed identifier generation for registry records

pub const ID_PREFIX_RESOURCE: &str = "res";
pub const ID_PREFIX_DEPLOYMENT: &str = "dep";
pub const ID_PREFIX_TASK: &str = "task";

/// Generate a unique id such as `res_3f2a...` (prefix + simple uuid)
pub fn generate_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}
