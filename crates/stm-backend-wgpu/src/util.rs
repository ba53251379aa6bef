// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use std::{
    any::Any,
    borrow::Cow,
    collections::HashMap,
    fmt,
    hash::{Hash, Hasher},
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex, PoisonError},
};

use thiserror::Error;
use wgpu::{Device, ShaderModule, ShaderModuleDescriptor, ShaderSource};

/// Errors that may occur when turning WGSL into a shader module.
#[derive(Debug, Error)]
pub enum ShaderLoadError {
    /// A specialisation placeholder was not present in the WGSL source.
    #[error("placeholder '{token}' not found in shader '{label}'")]
    MissingToken {
        /// The placeholder that could not be located.
        token: String,
        /// Label of the shader being specialised.
        label: String,
    },
    /// WGSL failed to compile or validate when creating a shader module.
    #[error("failed to compile WGSL shader '{label}' ({context})")]
    Compile {
        /// Label assigned to the shader module.
        label: String,
        /// Additional context, such as the specialisation applied.
        context: String,
        /// Underlying error reported by WGPU.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

fn cache_key(label: &str, source: &str) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    source.hash(&mut hasher);
    format!("{label}#{:x}", hasher.finish())
}

/// Shader modules compiled on one device, keyed by label and source hash.
///
/// The cache belongs to the [`GpuContext`](crate::GpuContext) that owns the
/// device and is dropped with it.
#[derive(Default)]
pub struct ShaderCache {
    modules: Mutex<HashMap<String, Arc<ShaderModule>>>,
}

impl ShaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, key: &str) -> Option<Arc<ShaderModule>> {
        self.modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn insert(&self, key: String, module: Arc<ShaderModule>) {
        self.modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, module);
    }
}

impl fmt::Debug for ShaderCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderCache")
            .field("modules", &self.len())
            .finish()
    }
}

#[derive(Debug)]
struct ShaderCompileError(String);

impl fmt::Display for ShaderCompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ShaderCompileError {}

fn panic_payload_to_string(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Compile `source` once per cache and label, reusing cached modules.
///
/// `cache` must belong to `device`. wgpu reports WGSL errors by panicking
/// inside `create_shader_module`; the panic is caught and surfaced as
/// [`ShaderLoadError::Compile`].
pub fn create_inline_module(
    device: &Device,
    cache: &ShaderCache,
    label: &str,
    source: String,
) -> Result<Arc<ShaderModule>, ShaderLoadError> {
    let key = cache_key(label, &source);
    if let Some(module) = cache.get(&key) {
        return Ok(module);
    }

    let module = catch_unwind(AssertUnwindSafe(|| {
        device.create_shader_module(ShaderModuleDescriptor {
            label: Some(label),
            source: ShaderSource::Wgsl(Cow::Owned(source)),
        })
    }))
    .map_err(|payload| ShaderLoadError::Compile {
        label: label.to_string(),
        context: key.clone(),
        source: Box::new(ShaderCompileError(panic_payload_to_string(payload))),
    })?;

    let module = Arc::new(module);
    cache.insert(key, Arc::clone(&module));
    Ok(module)
}

/// Replace every `(token, value)` placeholder in `source`.
///
/// Each token must occur at least once.
pub fn specialise(
    source: &str,
    label: &str,
    replacements: &[(&str, &str)],
) -> Result<String, ShaderLoadError> {
    let mut output = source.to_string();
    for (token, value) in replacements {
        if !output.contains(token) {
            return Err(ShaderLoadError::MissingToken {
                token: (*token).to_string(),
                label: label.to_string(),
            });
        }
        output = output.replace(token, value);
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specialise_replaces_all_occurrences() {
        let shader = "var a: texture_storage_2d<$FMT, write>;\nvar b: texture_storage_2d<$FMT, write>;\n";
        let out = specialise(shader, "test", &[("$FMT", "rgba16float")]).unwrap();
        assert_eq!(out.matches("rgba16float").count(), 2);
        assert!(!out.contains("$FMT"));
    }

    #[test]
    fn specialise_errors_when_token_missing() {
        let err = specialise("fn main() {}", "test", &[("$FMT", "rgba32float")]).unwrap_err();
        match err {
            ShaderLoadError::MissingToken { token, label } => {
                assert_eq!(token, "$FMT");
                assert_eq!(label, "test");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn cache_keys_follow_label_and_source() {
        assert_eq!(cache_key("a", "fn f() {}"), cache_key("a", "fn f() {}"));
        assert_ne!(cache_key("a", "fn f() {}"), cache_key("b", "fn f() {}"));
        assert_ne!(cache_key("a", "fn f() {}"), cache_key("a", "fn g() {}"));
    }

    #[test]
    fn fresh_cache_is_empty() {
        let cache = ShaderCache::new();
        assert!(cache.is_empty());
        assert_eq!(format!("{cache:?}"), "ShaderCache { modules: 0 }");
    }

    #[test]
    fn panic_payloads_are_stringified() {
        assert_eq!(panic_payload_to_string(Box::new("boom")), "boom");
        assert_eq!(panic_payload_to_string(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_payload_to_string(Box::new(7u8)), "unknown panic");
    }
}
