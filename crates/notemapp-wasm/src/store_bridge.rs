//! JavaScript key-value store bridge for WASM.
//!
//! Implements the `LocalStore` trait by calling JavaScript callback functions
//! provided by the web app. Each callback is an async JS function that
//! returns a Promise, which we convert to a Rust Future.

use async_trait::async_trait;
use note_sync::store::{LocalStore, Result, StoreError, StoreKind};
use serde::Serialize;
use serde_json::Value;
use wasm_bindgen::prelude::*;

use crate::js::{call_js_async, js_error_message};

/// JavaScript store bridge.
///
/// Holds JS callback functions for the three note stores. Every callback
/// receives the store name (`"notes"`, `"notes-meta"` or `"notes-prefs"`)
/// as its first argument.
///
/// # Example (TypeScript side)
///
/// ```typescript
/// const stores = { notes: createStore("notes", "notes"), ... };
/// const bridge = new JsLocalStore(
///   (store, key) => get(key, stores[store]),
///   (store, key, value) => set(key, value, stores[store]),
///   (store, key) => del(key, stores[store]),
///   (store) => keys(stores[store]),
///   (store) => values(stores[store]),
/// );
/// ```
#[wasm_bindgen]
pub struct JsLocalStore {
    get_fn: js_sys::Function,
    set_fn: js_sys::Function,
    del_fn: js_sys::Function,
    keys_fn: js_sys::Function,
    values_fn: js_sys::Function,
}

#[wasm_bindgen]
impl JsLocalStore {
    /// Create a new store bridge with JS callback functions.
    ///
    /// All callbacks should be async functions (returning Promises).
    #[wasm_bindgen(constructor)]
    pub fn new(
        get_fn: js_sys::Function,
        set_fn: js_sys::Function,
        del_fn: js_sys::Function,
        keys_fn: js_sys::Function,
        values_fn: js_sys::Function,
    ) -> Self {
        Self {
            get_fn,
            set_fn,
            del_fn,
            keys_fn,
            values_fn,
        }
    }
}

fn js_err_to_store_err(err: JsValue) -> StoreError {
    StoreError::Backend(js_error_message(&err))
}

/// Convert a JS value into JSON; `undefined` and `null` mean "absent".
fn from_js(value: JsValue) -> Result<Option<Value>> {
    if value.is_undefined() || value.is_null() {
        return Ok(None);
    }
    serde_wasm_bindgen::from_value(value)
        .map(Some)
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Plain objects, not `Map`s, so idb stores what the rest of the app reads.
fn to_js(value: &Value) -> Result<JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

#[async_trait(?Send)]
impl LocalStore for JsLocalStore {
    async fn get(&self, kind: StoreKind, key: &str) -> Result<Option<Value>> {
        let result = call_js_async(&self.get_fn, &[kind.name().into(), key.into()])
            .await
            .map_err(js_err_to_store_err)?;
        from_js(result)
    }

    async fn set(&self, kind: StoreKind, key: &str, value: Value) -> Result<()> {
        let js_value = to_js(&value)?;
        call_js_async(&self.set_fn, &[kind.name().into(), key.into(), js_value])
            .await
            .map_err(js_err_to_store_err)?;
        Ok(())
    }

    async fn del(&self, kind: StoreKind, key: &str) -> Result<()> {
        call_js_async(&self.del_fn, &[kind.name().into(), key.into()])
            .await
            .map_err(js_err_to_store_err)?;
        Ok(())
    }

    async fn keys(&self, kind: StoreKind) -> Result<Vec<String>> {
        let result = call_js_async(&self.keys_fn, &[kind.name().into()])
            .await
            .map_err(js_err_to_store_err)?;

        // idb keys may be numbers; only string keys are note ids
        let keys: Vec<Value> = serde_wasm_bindgen::from_value(result)
            .map_err(|e| StoreError::Serialization(format!("Failed to parse keys: {}", e)))?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.as_str().map(str::to_string))
            .collect())
    }

    async fn values(&self, kind: StoreKind) -> Result<Vec<Value>> {
        let result = call_js_async(&self.values_fn, &[kind.name().into()])
            .await
            .map_err(js_err_to_store_err)?;

        serde_wasm_bindgen::from_value(result)
            .map_err(|e| StoreError::Serialization(format!("Failed to parse values: {}", e)))
    }
}
