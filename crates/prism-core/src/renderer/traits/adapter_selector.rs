// Copyright 2025 eraflo
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

use crate::renderer::api::{AdapterInfo, RaytracingTier};

/// Discovers adapters and picks one able to run the raytracing pipeline.
///
/// A concrete implementation of this trait lives in `prism-infra`.
pub trait AdapterSelector<TAdapter> {
    /// The error type returned if selection fails.
    type Error: std::fmt::Debug + std::fmt::Display + Send + Sync + 'static;

    /// Lists every adapter the platform exposes, in enumeration order.
    fn list_adapters(&self) -> Vec<AdapterInfo>;

    /// Selects the first hardware adapter supporting `min_tier`, falling back to a
    /// software adapter if none does.
    ///
    /// # Returns
    ///
    /// The chosen adapter, or an error if neither kind qualifies.
    fn select_adapter(&self, min_tier: RaytracingTier) -> Result<TAdapter, Self::Error>;
}
