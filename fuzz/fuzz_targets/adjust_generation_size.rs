// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![no_main]

use libfuzzer_sys::fuzz_target;

use ncgen::adjust_generation_size;

fuzz_target!(|data: (i64, i64, i64, i64)| {
    let (cwnd, gs, grtt, rtt_threshold) = data;
    let egs = adjust_generation_size(cwnd, gs, grtt, rtt_threshold);

    assert!(egs <= cwnd);
    assert_eq!(egs, adjust_generation_size(cwnd, gs, grtt, rtt_threshold));
    if gs >= cwnd {
        assert_eq!(egs, cwnd);
    }
});
