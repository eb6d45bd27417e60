//! Promise plumbing shared by the JS bridges.

use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;

/// Helper to call a JS function and await its Promise result.
pub async fn call_js_async(func: &js_sys::Function, args: &[JsValue]) -> Result<JsValue, JsValue> {
    let this = JsValue::NULL;

    // Build arguments array
    let js_args = js_sys::Array::new();
    for arg in args {
        js_args.push(arg);
    }

    // Call the function - it returns a Promise (or a plain value, which resolves immediately)
    let result = func.apply(&this, &js_args)?;
    JsFuture::from(js_sys::Promise::resolve(&result)).await
}

/// Best-effort message of a thrown JS value.
pub fn js_error_message(err: &JsValue) -> String {
    err.as_string()
        .or_else(|| {
            js_sys::Reflect::get(err, &"message".into())
                .ok()
                .and_then(|v| v.as_string())
        })
        .unwrap_or_else(|| format!("{:?}", err))
}
