use occurrence_export::{export, ExportConfig};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ExportConfig::default();
    let artifacts = export(&config)?;
    log::debug!("Exported {:?}", artifacts);

    println!("Exported {} and {}", config.model_file_name, config.meta_file_name);
    Ok(())
}
