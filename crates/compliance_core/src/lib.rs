pub mod clock;
pub mod dates;
pub mod domain;
pub mod expiration;
pub mod lifecycle;
pub mod notification;
pub mod plans;
pub mod ports;
pub mod trial;

pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::{
    Company, DatedRecord, PaymentTransaction, Subscription, SubscriptionStatus, TransactionStatus,
};
pub use expiration::{classify, ExpirationPolicy, ExpirationStatus, ExpirationSummary};
pub use lifecycle::{
    LifecycleError, LifecycleResult, NewSubscription, SubscriptionManager, Transition,
    TransitionOutcome,
};
pub use notification::{is_within_window, notification_kind, NotificationKind};
pub use plans::{BillingInterval, Plan, PlanCatalog, PlanChange};
pub use ports::{DatabaseService, PaymentProcessor, PortError, PortResult};
pub use trial::{has_access, trial_status, AccessDecision, TrialStatus};
