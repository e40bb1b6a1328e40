//! Pure rendering of the nginx upstream block, split out from the
//! reconciliation loop so it can be tested without a container runtime.

/// Renders the `upstream app_pool {}` block plus its listener, in the exact
/// shape `original_source/watcher.py`'s `write_conf` produces. `backends`
/// are already-formatted `ip:port` strings, matching the watcher's
/// `backend_list` (§4.4).
pub fn render_upstream_conf(backends: &[String]) -> String {
    let mut body = String::from("upstream app_pool {\n    keepalive 64;\n");
    for backend in backends {
        body.push_str(&format!(
            "    server {backend} max_fails=3 fail_timeout=10s;\n"
        ));
    }
    body.push_str("}\n");
    body.push_str(
        "server { listen 80; location / { proxy_pass http://app_pool; proxy_set_header Host $host; } }\n",
    );
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_one_server_line_per_backend() {
        let conf =
            render_upstream_conf(&["10.0.0.2:8080".to_string(), "10.0.0.3:8080".to_string()]);
        assert!(conf.contains("server 10.0.0.2:8080 max_fails=3 fail_timeout=10s;"));
        assert!(conf.contains("server 10.0.0.3:8080 max_fails=3 fail_timeout=10s;"));
        assert!(conf.contains("upstream app_pool {"));
    }

    #[test]
    fn empty_backend_list_still_renders_valid_block() {
        let conf = render_upstream_conf(&[]);
        assert!(conf.contains("upstream app_pool {\n    keepalive 64;\n}\n"));
    }
}
