// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Cooperative cancellation context threaded through every public operation.
//!
//! `CancellationToken::is_cancelled` is a plain atomic load, so this is usable
//! from fully synchronous call sites without pulling in an async runtime,
//! while remaining the same type the rest of a tokio-based host process
//! already uses for shutdown signalling.

pub use tokio_util::sync::CancellationToken;

use crate::error::{Cancelled, Result};

/// Check a token and fail fast with [`crate::error::Error::Cancelled`] if it
/// has fired. Called on entry to every public operation and between
/// iterations of long-running loops (eviction scans, dirty-block
/// enumeration).
pub(crate) fn check(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        return Cancelled.fail();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_not_cancelled() {
        let token = CancellationToken::new();
        assert!(check(&token).is_ok());
    }

    #[test]
    fn cancelled_token_fails() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(check(&token).is_err());
    }
}
