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

//! The 4-byte XOR mask transform, streamable across chunk boundaries.

/// XORs `data` in place with `key`, continuing from a running `index` so a
/// single payload split across several reads unmasks consistently.
///
/// Returns the index the next call should resume from.
pub fn apply_mask(key: [u8; 4], data: &mut [u8], index: usize) -> usize {
  for (i, byte) in data.iter_mut().enumerate() {
    *byte ^= key[(index + i) & 3];
  }
  index + data.len()
}
