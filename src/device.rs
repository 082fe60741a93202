/// Compute target selection
///
/// The target is chosen once by the caller and handed to model
/// construction and loading; nothing reads ambient device state.
use candle_core::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeTarget {
    Cpu,
    Cuda(usize),
    Metal(usize),
}

impl ComputeTarget {
    /// Pick an available accelerator, falling back to the CPU
    pub fn detect() -> Self {
        if candle_core::utils::cuda_is_available() {
            ComputeTarget::Cuda(0)
        } else if candle_core::utils::metal_is_available() {
            ComputeTarget::Metal(0)
        } else {
            ComputeTarget::Cpu
        }
    }

    /// Open the Candle device for this target
    pub fn device(&self) -> crate::Result<Device> {
        let device = match *self {
            ComputeTarget::Cpu => Device::Cpu,
            ComputeTarget::Cuda(ordinal) => Device::new_cuda(ordinal)?,
            ComputeTarget::Metal(ordinal) => Device::new_metal(ordinal)?,
        };
        log::debug!("Using device: {:?}", device);
        Ok(device)
    }
}

impl Default for ComputeTarget {
    fn default() -> Self {
        Self::detect()
    }
}
