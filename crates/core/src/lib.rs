pub mod audit;
pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod facade;
pub mod recorder;
pub mod repository;
pub mod store;

pub use audit::{
    AuditAction, AuditEntityKind, AuditEntry, AuditStore, HistoryPage, InMemoryAuditStore,
};
pub use config::{
    AppConfig, ConfigError, ConfigOverrides, DatabaseConfig, LoadOptions, LogFormat,
    LoggingConfig, RoutingConfig,
};
pub use domain::overrides::{
    BookingId, BookingOverrideDraft, BookingOverrideId, BookingRoutingOverride, PropertyId,
    PropertyOverrideDraft, PropertyOverrideId, PropertyRuleOverride,
};
pub use domain::resolution::{
    FieldProvenance, PayoutSplit, ResolvedRouting, RoutingTier, RuleCandidates,
};
pub use domain::rule::{
    ChannelId, PlatformRule, PlatformRuleDraft, PlatformRuleId, RoutingType,
};
pub use engine::{
    DeterministicResolutionEngine, ResolutionEngine, ResolutionEngineConfig, ResolutionRequest,
    RoundingDrift,
};
pub use errors::{RepositoryError, RoutingError, StoreError, ValidationError};
pub use facade::RoutingFacade;
pub use recorder::{AuditRecorder, AuditRetryPolicy, ChainVerification};
pub use repository::{
    BookingOverrideRepository, InMemoryBookingOverrideRepository, InMemoryRuleRepository,
    RuleRepository,
};
pub use store::RuleStore;
