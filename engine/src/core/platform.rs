//! Platform glue: future spawning and device identification.

use std::future::Future;

/// Spawn a fire-and-forget future on the platform executor.
#[cfg(target_arch = "wasm32")]
pub fn spawn_future<F>(future: F)
where
    F: Future<Output = ()> + 'static,
{
    wasm_bindgen_futures::spawn_local(future);
}

/// Spawn a fire-and-forget future on the ambient tokio runtime.
///
/// Native callers must invoke this from within a runtime; timer callbacks in
/// [`crate::tasks::cpt::runner`] all originate there.
#[cfg(not(target_arch = "wasm32"))]
pub fn spawn_future<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(future);
}

#[cfg(target_arch = "wasm32")]
pub fn platform_string() -> String {
    web_sys::window()
        .map(|window| window.navigator().platform().unwrap_or_default())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "web".to_string())
}

#[cfg(not(target_arch = "wasm32"))]
pub fn platform_string() -> String {
    std::env::consts::OS.to_string()
}

#[cfg(target_arch = "wasm32")]
pub fn user_agent_string() -> Option<String> {
    web_sys::window()
        .and_then(|window| window.navigator().user_agent().ok())
        .filter(|ua| !ua.is_empty())
}

#[cfg(not(target_arch = "wasm32"))]
pub fn user_agent_string() -> Option<String> {
    None
}

/// Best-effort IANA timezone name for summary records.
#[cfg(target_arch = "wasm32")]
pub fn timezone_string() -> String {
    let options = js_sys::Intl::DateTimeFormat::new(&js_sys::Array::new(), &js_sys::Object::new())
        .resolved_options();
    js_sys::Reflect::get(&options, &wasm_bindgen::JsValue::from_str("timeZone"))
        .ok()
        .and_then(|value| value.as_string())
        .unwrap_or_else(|| "UTC".to_string())
}

#[cfg(not(target_arch = "wasm32"))]
pub fn timezone_string() -> String {
    std::env::var("TZ").unwrap_or_else(|_| "UTC".to_string())
}
