pub mod compute;
pub mod constants;
pub mod ec2;
pub mod error;
pub mod pricing;

pub use compute::{Compute, GroupScope};
pub use ec2::Ec2Compute;
pub use error::ProviderError;
pub use pricing::{format_cost, PricingCache, PricingService};
