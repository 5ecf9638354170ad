// Copyright 2023 Divy Srivastava <dj.srivastava23@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Injected capabilities: randomness and time. Kept as traits so tests can
//! supply deterministic stand-ins instead of the system clock and RNG.

use rand::RngCore;
use std::time::SystemTime;

/// Source of randomness for masking keys and handshake keys.
pub trait RandomSource: Send + Sync {
  fn fill(&self, buf: &mut [u8]);
}

/// `rand`'s thread-local RNG, the default for production use.
pub struct SystemRandom;

impl RandomSource for SystemRandom {
  fn fill(&self, buf: &mut [u8]) {
    rand::thread_rng().fill_bytes(buf);
  }
}

/// Source of timestamps for `last_sync_at`.
pub trait Clock: Send + Sync {
  fn now(&self) -> SystemTime;
}

/// The wall clock, the default for production use.
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> SystemTime {
    SystemTime::now()
  }
}
