pub mod frame_driver;
pub mod frame_timeline;
pub mod swapchain;
