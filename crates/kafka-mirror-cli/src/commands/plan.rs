use anyhow::Result;
use kafka_mirror_core::{MirrorEngine, MirrorPlan, EARLIEST_OFFSET, LATEST_OFFSET};
use tracing::info;

/// Plan command output format
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "yaml" => Self::Yaml,
            _ => Self::Text,
        }
    }
}

pub async fn run(config_path: &str, topics: Vec<String>, format: &str) -> Result<()> {
    let config = super::load_config(config_path, topics, None)?;

    let engine = MirrorEngine::new(config)?;
    info!("Planning mirror of {} topic(s)", engine.run_config().topics.len());
    let plan = engine.plan().await?;

    match OutputFormat::from(format) {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        OutputFormat::Yaml => {
            println!("{}", serde_yaml::to_string(&plan)?);
        }
        OutputFormat::Text => {
            print_plan_text(&plan);
        }
    }

    Ok(())
}

fn describe_offset(offset: i64) -> String {
    match offset {
        EARLIEST_OFFSET => "earliest".to_string(),
        LATEST_OFFSET => "latest".to_string(),
        explicit => explicit.to_string(),
    }
}

fn print_plan_text(plan: &MirrorPlan) {
    println!("╔══════════════════════════════════════════════════════════════════════╗");
    println!("║                            MIRROR PLAN                               ║");
    println!("╠══════════════════════════════════════════════════════════════════════╣");

    for topic in &plan.source_topics {
        let recreate = if plan
            .reconciliation
            .topics_to_delete
            .contains(&topic.name)
        {
            "delete + create"
        } else {
            "create"
        };
        println!(
            "║ {:40} {:3} partition(s) {:11} ║",
            topic.name,
            topic.partition_count(),
            recreate
        );
    }

    println!("╠══════════════════════════════════════════════════════════════════════╣");
    println!("║                          STARTING OFFSETS                            ║");
    println!("╠══════════════════════════════════════════════════════════════════════╣");

    for (topic, partition, offset) in plan.assignment.iter() {
        let position = format!("{}:{}", topic, partition);
        println!("║ {:50} {:>17} ║", position, describe_offset(offset));
    }

    println!("╚══════════════════════════════════════════════════════════════════════╝");

    if plan.reconciliation.is_destructive() {
        println!();
        println!(
            "WARNING: existing data in {} sink topic(s) will be discarded: {}",
            plan.reconciliation.topics_to_delete.len(),
            plan.reconciliation.topics_to_delete.join(", ")
        );
    }
}
