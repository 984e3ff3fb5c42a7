use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::env;
use std::path::Path;

use finsight::sample::clamp_sample_size;
use finsight::{
    all_transactions, count_transactions, insert_transactions, load_csv_file, logging,
    open_database, train_model, AppConfig, DataQualityEngine, SampleGenerator, TransactionRecord,
};

const USAGE: &str = "Usage: finsight <import <file.csv> | train | sample [n] | stats>";

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    let config = AppConfig::load()?;
    logging::init(&config.logging)?;

    match args.get(1).map(String::as_str) {
        Some("import") => {
            let path = args.get(2).context(USAGE)?;
            run_import(&config, Path::new(path))?;
        }
        Some("train") => run_train(&config)?,
        Some("sample") => {
            let n = match args.get(2) {
                Some(raw) => raw
                    .parse::<usize>()
                    .with_context(|| format!("Invalid sample size '{}'", raw))?,
                None => 1000,
            };
            run_sample(&config, n)?;
        }
        Some("stats") => run_stats(&config)?,
        _ => bail!(USAGE),
    }

    Ok(())
}

fn run_import(config: &AppConfig, csv_path: &Path) -> Result<()> {
    println!("🗄️  Data Import - CSV → SQLite + WAL");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!("\n📂 Loading CSV...");
    let documents = load_csv_file(csv_path)?;
    println!("✓ Loaded {} rows from {}", documents.len(), csv_path.display());

    println!("\n🔧 Opening database...");
    let conn = open_database(&config.database_path())?;

    println!("\n💾 Inserting transactions...");
    let now = Utc::now();
    let records: Vec<TransactionRecord> = documents
        .into_iter()
        .map(|doc| TransactionRecord::ingested(doc, now))
        .collect();
    let inserted = insert_transactions(&conn, &records)?;

    let total = count_transactions(&conn)?;
    println!("✓ Inserted {} transactions ({} total)", inserted, total);

    Ok(())
}

fn run_train(config: &AppConfig) -> Result<()> {
    println!("🌲 Training anomaly model...");
    let conn = open_database(&config.database_path())?;
    let records = all_transactions(&conn)?;

    let path = train_model(&records, &config.model_settings())?;
    println!("✓ Trained on {} transactions", records.len());
    println!("✓ Model saved to {}", path.display());

    Ok(())
}

fn run_sample(config: &AppConfig, n: usize) -> Result<()> {
    let n = clamp_sample_size(n);
    println!("🎲 Generating {} sample transactions...", n);

    let conn = open_database(&config.database_path())?;
    let records = SampleGenerator::new(None).generate(n, Utc::now().naive_utc());
    let inserted = insert_transactions(&conn, &records)?;
    println!("✓ Inserted {} transactions", inserted);

    Ok(())
}

fn run_stats(config: &AppConfig) -> Result<()> {
    let conn = open_database(&config.database_path())?;
    let report = DataQualityEngine::new().assess(&conn)?;

    println!("📊 Transaction Store");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Records: {}", report.total_records);
    println!("{}", report.summary());
    for (field, missing) in &report.missing_values {
        if missing.as_i64().unwrap_or(0) > 0 {
            println!("   {:<16} {} missing", field, missing);
        }
    }
    for issue in &report.issues {
        println!("   ⚠️  {}: {} ({})", issue.field, issue.issue, issue.recommendation);
    }

    Ok(())
}
