// Bootstrap HTML page

//! HTML page shown once to the operator

use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Landing text for `/`
pub const ROOT_TEXT: &str = "This app only serves /bootstrap (one-time WireGuard config + QR).";

/// Render the one-time page with the QR image and the raw config
pub fn render_page(config: &str, qr_png: &[u8]) -> String {
    let qr_base64 = STANDARD.encode(qr_png);
    let config = escape_html(config);

    format!(
        r#"<!doctype html>
<html>
  <head>
    <meta charset="utf-8">
    <title>Your WireGuard VPN</title>
    <style>
      body {{ font-family: system-ui, -apple-system, BlinkMacSystemFont, sans-serif; max-width: 800px; margin: 2rem auto; padding: 0 1rem; }}
      pre {{ background: #f5f5f5; padding: 1rem; overflow-x: auto; }}
      img {{ border: 1px solid #ddd; padding: 0.5rem; background: #fff; max-width: 100%; height: auto; }}
    </style>
  </head>
  <body>
    <h1>Your WireGuard VPN</h1>

    <h2>1. Scan this QR code with the WireGuard mobile app</h2>
    <p>Open the WireGuard app on your phone and choose "Scan from QR code".</p>
    <img src="data:image/png;base64,{qr_base64}" alt="WireGuard config QR">

    <h2>2. Or copy this configuration into a desktop client</h2>
    <pre>{config}</pre>

    <p><strong>Note:</strong> This page is one-time only. After you close it, the bootstrap endpoint is disabled.</p>
  </body>
</html>
"#
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_embeds_image_and_config() {
        let html = render_page("[Peer]\nEndpoint = myvpn:51820\n", &[1, 2, 3]);
        assert!(html.contains(r#"src="data:image/png;base64,AQID""#));
        assert!(html.contains("<pre>[Peer]\nEndpoint = myvpn:51820\n</pre>"));
    }

    #[test]
    fn test_config_is_escaped() {
        let html = render_page("PrivateKey = a<b>&\"c\"", &[]);
        assert!(html.contains("PrivateKey = a&lt;b&gt;&amp;&#34;c&#34;"));
        assert!(!html.contains("a<b>"));
    }

    #[test]
    fn test_base64_padding_kept() {
        let html = render_page("", &[0xff]);
        assert!(html.contains("base64,/w=="));
    }
}
