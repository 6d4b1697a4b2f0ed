// Default seed relays for meshchat
//
// Build-time customization:
// - Set MESHCHAT_SEED_NODES during build
// - Format: comma-separated host:port
// - Example: export MESHCHAT_SEED_NODES="relay1.example.net:3000,relay2.example.net:3000"

/// Used when nothing is configured and no build-time override is set
pub const DEFAULT_SEED_NODES: &[&str] = &["localhost:3000"];

/// Get default seed relays, with optional build-time override
pub fn default_seed_nodes() -> Vec<String> {
    parse_seed_override(option_env!("MESHCHAT_SEED_NODES"))
}

fn parse_seed_override(value: Option<&str>) -> Vec<String> {
    let nodes: Vec<String> = value
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if nodes.is_empty() {
        DEFAULT_SEED_NODES.iter().map(|s| s.to_string()).collect()
    } else {
        nodes
    }
}
