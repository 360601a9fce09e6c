//! `pke status`: show the effective configuration.

use pke_config::AppConfig;
use pke_core::invocation::Invocation;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    println!("PKE Status");
    println!("==========");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Provider:     {}", config.default_provider);
    println!("  Model:        {}", config.resolved_model());
    println!("  API key:      {}", if config.has_api_key() { "set" } else { "missing" });
    println!("  Gateway:      {}:{}", config.gateway.host, config.gateway.port);
    println!(
        "  Store:        {} ({})",
        config.store.backend,
        config.store.resolved_path().display()
    );
    println!("  Retention:    {} days", config.audit.retention_days);
    println!(
        "  Revalidate:   {}",
        if config.workflow.revalidate_on_accept { "on accept" } else { "off" }
    );
    println!("  Timeout:      {}s", config.workflow.generation_timeout_secs);

    println!("\n  Invocations:");
    for inv in Invocation::ALL {
        let s = config.invocations.get(inv);
        println!(
            "    {} {:<16} temperature {:.1}  max tokens {:>5}{}",
            inv.number(),
            inv.name(),
            s.temperature,
            s.max_tokens,
            s.model.as_deref().map(|m| format!("  model {m}")).unwrap_or_default()
        );
    }

    Ok(())
}
