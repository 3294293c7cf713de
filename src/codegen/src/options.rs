// Copyright 2024 Basalt Contributors
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

/// Which device the query compiles for. The IR is shared; the device
/// changes overflow-check emission, atomics address space, and the
/// artifact flavor the driver produces from the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Cpu,
    Gpu,
}

#[derive(Debug, Clone, Copy)]
pub struct CompilationOptions {
    pub device_type: DeviceType,
    pub hoist_literals: bool,
}

impl CompilationOptions {
    pub fn cpu() -> CompilationOptions {
        CompilationOptions {
            device_type: DeviceType::Cpu,
            hoist_literals: true,
        }
    }

    pub fn gpu() -> CompilationOptions {
        CompilationOptions {
            device_type: DeviceType::Gpu,
            hoist_literals: true,
        }
    }
}

impl Default for CompilationOptions {
    fn default() -> Self {
        CompilationOptions::cpu()
    }
}

/// The artifact flavor handed to the execution driver. The CPU flavor is
/// always produced; GPU flavors are produced only when the corresponding
/// runtime is present on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Textual IR, JIT-compiled to native code by the driver.
    CpuIr,
    /// NVPTX for CUDA devices.
    Ptx,
    /// SPIR-V for Level Zero devices.
    SpirV,
}
