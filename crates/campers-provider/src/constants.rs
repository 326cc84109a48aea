use std::time::Duration;

/// Delay between state-waiter polls.
pub const WAITER_DELAY: Duration = Duration::from_secs(15);

/// Poll budget for short transitions (launch → running, start → running).
pub const WAITER_MAX_ATTEMPTS_SHORT: u32 = 40;

/// Poll budget for long transitions (stop → stopped, terminate → terminated).
pub const WAITER_MAX_ATTEMPTS_LONG: u32 = 80;

/// Public IP assignment lags the running state; poll it separately.
pub const IP_RETRY_DELAY: Duration = Duration::from_secs(3);
pub const IP_RETRY_MAX: u32 = 10;

/// Security-group deletion backoff while the ENI releases.
pub const SG_DELETE_BASE_DELAY: Duration = Duration::from_secs(1);
pub const SG_DELETE_MAX_DELAY: Duration = Duration::from_secs(30);
pub const SG_DELETE_MAX_ATTEMPTS: u32 = 5;

/// Name-collision retry budget for security-group creation.
pub const SG_CREATE_MAX_ATTEMPTS: u32 = 3;

pub const EC2_API_VERSION: &str = "2016-11-15";

/// EBS gp3 storage price used for stopped-instance cost estimates.
pub const EBS_GB_MONTH_USD: f64 = 0.08;

/// Hours billed per month in the cost estimate (`hourly × 24 × 30`).
pub const BILLING_HOURS_PER_MONTH: f64 = 24.0 * 30.0;

/// Region code → location name, as the pricing catalog filters by location.
pub const REGION_TO_LOCATION: &[(&str, &str)] = &[
    ("us-east-1", "US East (N. Virginia)"),
    ("us-east-2", "US East (Ohio)"),
    ("us-west-1", "US West (N. California)"),
    ("us-west-2", "US West (Oregon)"),
    ("eu-west-1", "EU (Ireland)"),
    ("eu-west-2", "EU (London)"),
    ("eu-west-3", "EU (Paris)"),
    ("eu-central-1", "EU (Frankfurt)"),
    ("eu-north-1", "EU (Stockholm)"),
    ("eu-south-1", "EU (Milan)"),
    ("ap-northeast-1", "Asia Pacific (Tokyo)"),
    ("ap-northeast-2", "Asia Pacific (Seoul)"),
    ("ap-northeast-3", "Asia Pacific (Osaka)"),
    ("ap-southeast-1", "Asia Pacific (Singapore)"),
    ("ap-southeast-2", "Asia Pacific (Sydney)"),
    ("ap-south-1", "Asia Pacific (Mumbai)"),
    ("sa-east-1", "South America (Sao Paulo)"),
    ("ca-central-1", "Canada (Central)"),
    ("me-south-1", "Middle East (Bahrain)"),
    ("af-south-1", "Africa (Cape Town)"),
];

pub fn region_location(region: &str) -> Option<&'static str> {
    REGION_TO_LOCATION
        .iter()
        .find(|(code, _)| *code == region)
        .map(|(_, loc)| *loc)
}
