use std::sync::Arc;
use ash::vk;
use color_eyre::Result;

pub struct Queue {
    pub family_index: u32,
    pub handle: vk::Queue,
    device: Arc<ash::Device>,
}

impl Queue {
    pub fn new(
        family_index: u32,
        device: Arc<ash::Device>,
    ) -> Self {
        let handle = unsafe { device.get_device_queue(family_index, 0) };
        Self {
            family_index,
            handle,
            device,
        }
    }

    pub fn submit(
        &self,
        submits: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> Result<()> {
        unsafe {
            self.device.queue_submit(self.handle, submits, fence)?;
        }
        Ok(())
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.queue_wait_idle(self.handle)?;
        }
        Ok(())
    }
}
