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

//! Dedicated atomic-subtract helper, to avoid the off-by-one bugs a naive
//! wrapping `fetch_sub` invites at call sites that forget which direction
//! wraps.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomically subtract `amount` from `counter` using two's-complement
/// `fetch_add`, returning the counter's previous value.
pub(crate) fn atomic_sub_u64(counter: &AtomicU64, amount: u64) -> u64 {
    counter.fetch_add(amount.wrapping_neg(), Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtracts_without_underflow_panics() {
        let counter = AtomicU64::new(10);
        atomic_sub_u64(&counter, 4);
        assert_eq!(counter.load(Ordering::SeqCst), 6);
    }
}
