use ash::vk;
use itertools::Itertools;

use crate::{
    error::{GfxError, GfxResult, VkResultExt},
    foundation::surface::GfxSurface,
};

/// 表示一张物理显卡，以及选中的 graphics queue family
pub struct GfxPhysicalDevice {
    pub handle: vk::PhysicalDevice,

    /// 当前 gpu 的基础属性
    pub basic_props: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,

    /// 同时支持 graphics、compute、transfer，并且（如果有 surface）可以 present
    pub graphics_queue_family: u32,
}

// new & init
impl GfxPhysicalDevice {
    /// 优先选择独立显卡；只考虑支持 vulkan 1.3 且有可用 graphics queue 的显卡
    pub fn pick(instance: &ash::Instance, surface: Option<&GfxSurface>) -> GfxResult<Self> {
        let pdevices = unsafe { instance.enumerate_physical_devices() }.gfx_call("vkEnumeratePhysicalDevices")?;

        let candidates = pdevices
            .into_iter()
            .map(|pdevice| Self::new(instance, pdevice, surface))
            .collect::<GfxResult<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect_vec();

        let picked = candidates.into_iter().find_or_first(Self::is_discrete_gpu).ok_or_else(|| {
            log::error!("no physical device supports vulkan 1.3 with a usable graphics queue");
            GfxError::Loading("no suitable physical device".to_string())
        })?;
        log::info!("pick gpu: {}", picked.device_name());
        Ok(picked)
    }

    /// 不满足要求的显卡返回 None
    fn new(
        instance: &ash::Instance,
        pdevice: vk::PhysicalDevice,
        surface: Option<&GfxSurface>,
    ) -> GfxResult<Option<Self>> {
        let basic_props = unsafe { instance.get_physical_device_properties(pdevice) };
        let device_name = Self::name_of(&basic_props);
        log::info!("found gpu: {}", device_name);

        if basic_props.api_version < vk::API_VERSION_1_3 {
            log::info!("skip gpu {}: vulkan 1.3 is not supported", device_name);
            return Ok(None);
        }

        let queue_family_properties = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
        let required_flags = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
        let mut graphics_queue_family = None;
        for (index, props) in queue_family_properties.iter().enumerate() {
            if !props.queue_flags.contains(required_flags) {
                continue;
            }
            let can_present = match surface {
                Some(surface) => surface.supports_present(pdevice, index as u32)?,
                None => true,
            };
            if can_present {
                graphics_queue_family = Some(index as u32);
                break;
            }
        }
        let Some(graphics_queue_family) = graphics_queue_family else {
            log::info!("skip gpu {}: no graphics queue can present to the surface", device_name);
            return Ok(None);
        };

        Ok(Some(Self {
            handle: pdevice,
            basic_props,
            memory_properties: unsafe { instance.get_physical_device_memory_properties(pdevice) },
            graphics_queue_family,
        }))
    }
}

// getters
impl GfxPhysicalDevice {
    /// 当前 gpu 是否是独立显卡
    #[inline]
    pub fn is_discrete_gpu(&self) -> bool {
        self.basic_props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }

    #[inline]
    pub fn device_name(&self) -> String {
        Self::name_of(&self.basic_props)
    }

    fn name_of(props: &vk::PhysicalDeviceProperties) -> String {
        props.device_name_as_c_str().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default()
    }
}
