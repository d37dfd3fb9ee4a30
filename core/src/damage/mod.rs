pub mod aggregator;
pub mod severity;

pub use aggregator::{cluster_batch, ClusterMember, ClusterUpdate, DamageAggregator, DamageCluster};
pub use severity::{evidence_factor, Combine, Severity, SeverityRule, SeverityTable, TierRule};
