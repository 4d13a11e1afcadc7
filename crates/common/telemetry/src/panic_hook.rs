// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Panic hook that reports panics as `tracing` events.

use std::{panic, thread};

use backtrace::Backtrace;

/// Log every panic as an `error` event carrying the thread, location and a
/// backtrace, then run the previously installed hook.
///
/// Call after [`init_global_logging`](crate::init_global_logging) so the
/// event reaches the configured outputs.
pub fn set_panic_hook() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let current = thread::current();
        let location = info
            .location()
            .map_or_else(|| "<unknown>".to_string(), ToString::to_string);
        let backtrace = Backtrace::new();
        tracing::error!(
            panic = %info,
            thread = current.name().unwrap_or("<unnamed>"),
            location = %location,
            backtrace = ?backtrace,
            "panicked"
        );
        default_hook(info);
    }));
}
