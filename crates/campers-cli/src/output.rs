use campers_domain::InstanceSummary;
use campers_provider::format_cost;
use chrono::{DateTime, Utc};

const NAME_WIDTH: usize = 20;

/// Relative "launched" column: `5m ago`, `3h ago`, `2d ago`.
pub fn format_time_ago(time: Option<DateTime<Utc>>) -> String {
    let Some(time) = time else {
        return "unknown".to_string();
    };
    let elapsed = Utc::now() - time;
    let minutes = elapsed.num_minutes().max(0);
    if minutes < 1 {
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 60 * 24 {
        format!("{}h ago", minutes / 60)
    } else {
        format!("{}d ago", minutes / (60 * 24))
    }
}

pub fn truncate_name(name: &str) -> String {
    if name.chars().count() <= NAME_WIDTH {
        name.to_string()
    } else {
        let head: String = name.chars().take(NAME_WIDTH - 1).collect();
        format!("{}…", head)
    }
}

/// One row per instance; the Region column is omitted when the listing was
/// already filtered to a single region.
pub fn render_instance_table(
    instances: &[InstanceSummary],
    costs: &[Option<f64>],
    region_filtered: bool,
) -> String {
    let mut out = String::new();

    if region_filtered {
        out.push_str(&format!(
            "{:<20} {:<20} {:<12} {:<15} {:<12} {:<21}\n",
            "NAME", "INSTANCE-ID", "STATE", "TYPE", "LAUNCHED", "COST/MONTH"
        ));
        out.push_str(&"-".repeat(100));
        out.push('\n');
        for (inst, cost) in instances.iter().zip(costs) {
            out.push_str(&format!(
                "{:<20} {:<20} {:<12} {:<15} {:<12} {:<21}\n",
                truncate_name(&inst.camp_name),
                inst.instance_id,
                inst.state.to_string(),
                inst.instance_type,
                format_time_ago(inst.launch_time),
                format_cost(*cost),
            ));
        }
    } else {
        out.push_str(&format!(
            "{:<20} {:<20} {:<12} {:<15} {:<15} {:<12} {:<21}\n",
            "NAME", "INSTANCE-ID", "STATE", "REGION", "TYPE", "LAUNCHED", "COST/MONTH"
        ));
        out.push_str(&"-".repeat(115));
        out.push('\n');
        for (inst, cost) in instances.iter().zip(costs) {
            out.push_str(&format!(
                "{:<20} {:<20} {:<12} {:<15} {:<15} {:<12} {:<21}\n",
                truncate_name(&inst.camp_name),
                inst.instance_id,
                inst.state.to_string(),
                inst.region,
                inst.instance_type,
                format_time_ago(inst.launch_time),
                format_cost(*cost),
            ));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use campers_domain::InstanceState;
    use chrono::Duration;

    fn summary(camp: &str) -> InstanceSummary {
        InstanceSummary {
            instance_id: "i-0abc123def4567890".into(),
            name: format!("campers-{}", camp),
            state: InstanceState::Running,
            region: "us-east-1".into(),
            instance_type: "t3.medium".into(),
            launch_time: Some(Utc::now() - Duration::hours(3)),
            camp_name: camp.into(),
            unique_id: None,
        }
    }

    #[test]
    fn time_ago_buckets() {
        assert_eq!(format_time_ago(None), "unknown");
        assert_eq!(format_time_ago(Some(Utc::now())), "just now");
        assert_eq!(format_time_ago(Some(Utc::now() - Duration::minutes(5))), "5m ago");
        assert_eq!(format_time_ago(Some(Utc::now() - Duration::hours(26))), "1d ago");
    }

    #[test]
    fn long_names_are_truncated() {
        assert_eq!(truncate_name("short"), "short");
        let long = "a".repeat(30);
        let truncated = truncate_name(&long);
        assert!(truncated.chars().count() <= 20);
        assert!(truncated.ends_with('…'));
    }

    #[test]
    fn filtered_table_omits_region_column() {
        let rows = vec![summary("jupyter")];
        let filtered = render_instance_table(&rows, &[Some(33.55)], true);
        assert!(!filtered.contains("REGION"));
        assert!(filtered.contains("$33.55/month"));

        let unfiltered = render_instance_table(&rows, &[None], false);
        assert!(unfiltered.contains("REGION"));
        assert!(unfiltered.contains("us-east-1"));
        assert!(unfiltered.contains("Pricing unavailable"));
    }
}
