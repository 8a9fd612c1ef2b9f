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

//! Small macros shared across modules.

/// Define `Result<T>` as an alias over this crate's `Error` type.
macro_rules! define_result {
    ($t:ty) => {
        #[allow(unused)]
        pub type Result<T> = std::result::Result<T, $t>;
    };
}

pub(crate) use define_result;

#[cfg(test)]
mod tests {
    #[derive(Debug, PartialEq, Eq)]
    struct E(i32);
    define_result!(E);

    #[test]
    fn test_define_result() {
        fn fails() -> Result<()> {
            Err(E(1))
        }
        assert_eq!(Err(E(1)), fails());
    }
}
