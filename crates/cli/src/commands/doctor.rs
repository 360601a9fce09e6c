//! `pke doctor`: diagnose configuration and storage.

use pke_config::AppConfig;
use pke_core::store::CourseStore;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("PKE Doctor: System Diagnostics");
    println!("==============================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if !config_path.exists() {
        println!("  [warn] No config file, using defaults. Run `pke onboard` to create one");
        issues += 1;
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  [ok]   Config valid");
            config
        }
        Err(e) => {
            println!("  [fail] Config invalid: {e}");
            println!("\n  1 blocking issue found.");
            return Ok(());
        }
    };

    if config.has_api_key() {
        println!("  [ok]   API key configured for '{}'", config.default_provider);
    } else {
        println!("  [warn] No API key; set PKE_API_KEY or api_key in config.toml");
        issues += 1;
    }

    match pke_store::open(&config.store).await {
        Ok(stores) => println!(
            "  [ok]   Store '{}' opened ({})",
            stores.courses.name(),
            config.store.resolved_path().display()
        ),
        Err(e) => {
            println!("  [fail] Store '{}' failed to open: {e}", config.store.backend);
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  All checks passed!");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
