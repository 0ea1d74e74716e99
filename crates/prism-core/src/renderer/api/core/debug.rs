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

//! Messages from the device's validation layer.

use std::fmt;

/// Severity of a validation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageSeverity {
    /// Informational.
    Info,
    /// Suspicious usage that still produced a defined result.
    Warning,
    /// Invalid usage.
    Error,
    /// Invalid usage that removed the device.
    Corruption,
}

/// One entry of the device's debug message queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationMessage {
    /// How bad it is.
    pub severity: MessageSeverity,
    /// Human readable text.
    pub text: String,
}

impl fmt::Display for ValidationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.severity, self.text)
    }
}
