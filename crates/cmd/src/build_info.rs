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

use shadow_rs::{formatcp, shadow};

shadow!(build);

pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");

/// Set `PARFETCH_RELEASE` at compile time to build a release binary.
const RELEASE: bool = option_env!("PARFETCH_RELEASE").is_some();

const DIRTY: &str = if build::GIT_CLEAN { "" } else { "-dirty" };

/// Short version string.
///
/// Development builds carry a "-unofficial" suffix, plus the short commit
/// hash when the build ran inside a git checkout.
#[allow(clippy::const_is_empty)]
pub const VERSION: &str = if RELEASE {
    build::PKG_VERSION
} else if build::SHORT_COMMIT.is_empty() {
    formatcp!("{}-unofficial", build::PKG_VERSION)
} else {
    formatcp!("{}-unofficial+{}{}", build::PKG_VERSION, build::SHORT_COMMIT, DIRTY)
};

/// Build report printed by `parfetch --version`; `-V` prints [`VERSION`].
pub const LONG_VERSION: &str = formatcp!(
    "{}\nbranch: {}\ncommit: {}\nbuilt: {}\nrustc: {}",
    VERSION,
    build::BRANCH,
    build::COMMIT_HASH,
    build::BUILD_TIME,
    build::RUST_VERSION,
);
