/// Browser side of the reload contract, injected into every proxied HTML page.
pub const RELOAD_SCRIPT: &str = include_str!("reload.js");

const BODY_CLOSE: &[u8] = b"</body>";

/// Inserts the reload script immediately before the last `</body>` tag.
///
/// Pages without a closing body tag are returned unchanged.
pub fn inject_script(page: &[u8]) -> Vec<u8> {
    let Some(index) = page
        .windows(BODY_CLOSE.len())
        .rposition(|window| window == BODY_CLOSE)
    else {
        return page.to_vec();
    };

    let script = format!("<script>{RELOAD_SCRIPT}</script>");

    let mut injected = Vec::with_capacity(page.len() + script.len());
    injected.extend_from_slice(&page[..index]);
    injected.extend_from_slice(script.as_bytes());
    injected.extend_from_slice(&page[index..]);
    injected
}
