//! Wrapped-tool CLI configuration pointing registries at the cache server.

use std::fmt::Write;
use std::path::Path;

use crate::error::CacheResult;

/// Environment variable the wrapped tool reads its CLI config path from.
pub const CLI_CONFIG_ENV: &str = "TF_CLI_CONFIG_FILE";

/// Render `host` blocks sending `providers.v1` for each registry to the
/// cache server, plus credentials for the server itself.
///
/// `server_url` is the server's root, e.g. `http://127.0.0.1:41235`.
pub fn render_cli_config(server_url: &str, token: &str, registries: &[String]) -> String {
    let server_url = server_url.trim_end_matches('/');
    let mut out = String::new();
    for registry in registries {
        let _ = writeln!(out, "host \"{}\" {{", registry);
        let _ = writeln!(out, "  services = {{");
        let _ = writeln!(
            out,
            "    \"providers.v1\" = \"{}/v1/providers/{}/\"",
            server_url, registry
        );
        let _ = writeln!(out, "  }}");
        let _ = writeln!(out, "}}");
        let _ = writeln!(out);
    }

    let credentials_host = server_host(server_url);
    let _ = writeln!(out, "credentials \"{}\" {{", credentials_host);
    let _ = writeln!(out, "  token = \"{}\"", token);
    let _ = writeln!(out, "}}");
    out
}

/// Write the rendered configuration to `path`.
pub fn write_cli_config(
    path: &Path,
    server_url: &str,
    token: &str,
    registries: &[String],
) -> CacheResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render_cli_config(server_url, token, registries))?;
    Ok(())
}

/// Name of the `TF_TOKEN_<host>` variable carrying credentials for `host`.
///
/// Dots become underscores and dashes double underscores; any port is
/// dropped since it cannot be expressed in a variable name.
pub fn token_env_var(host: &str) -> String {
    let host = host.split(':').next().unwrap_or(host);
    format!("TF_TOKEN_{}", host.replace('-', "__").replace('.', "_"))
}

/// `host[:port]` of a URL.
pub fn server_host(server_url: &str) -> &str {
    let rest = server_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(server_url);
    rest.split('/').next().unwrap_or(rest)
}
