// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod call_graph_stat;
pub mod chunked_queue;
pub mod dot;
pub mod mem_watcher;
pub mod options;
pub mod progress;
pub mod results_dumper;

/// A cooperative cancellation token shared between an analysis session and
/// its driver. CPU-heavy loops poll the token at loop granularity and return
/// their partial output when it fires.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Strips one level of pointer indirection from a type string.
/// `*database/sql.DB` becomes `database/sql.DB`; other strings are unchanged.
#[inline]
pub fn strip_pointer(ty: &str) -> &str {
    ty.strip_prefix('*').unwrap_or(ty)
}

/// Synthesises the method-on-receiver descriptor `(RecvType).Method`.
#[inline]
pub fn method_descriptor(recv_ty: &str, method: &str) -> String {
    format!("({}).{}", recv_ty, method)
}

/// Extracts the package path from a named type string, if any.
/// `*net/http.Request` yields `net/http`; unqualified types yield `None`.
pub fn package_of_type(ty: &str) -> Option<&str> {
    let named = strip_pointer(ty);
    match named.rfind('.') {
        Some(dot) if dot > 0 => Some(&named[..dot]),
        _ => None,
    }
}
