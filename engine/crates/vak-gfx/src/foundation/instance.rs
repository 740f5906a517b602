use std::{
    collections::HashSet,
    ffi::{CStr, CString, c_char},
};

use ash::vk;
use itertools::Itertools;

use crate::{
    error::{GfxError, GfxResult, VkResultExt},
    foundation::debug_messenger::GfxDebugMessenger,
};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub struct GfxInstance {
    /// 仅仅是函数指针，以及一个裸的 handle
    pub(crate) ash_instance: ash::Instance,
    validation_enabled: bool,
}

// new & init
impl GfxInstance {
    /// 设置所需的 layers 和 extensions，创建 vk instance
    ///
    /// `enable_validation` 为 true 但系统中没有 validation layer 时，只输出一条警告
    pub fn new(
        vk_entry: &ash::Entry,
        app_name: &str,
        engine_name: &str,
        extra_instance_exts: &[&'static CStr],
        enable_validation: bool,
    ) -> GfxResult<Self> {
        let app_name = CString::new(app_name).map_err(|e| GfxError::InvalidDesc(e.to_string()))?;
        let engine_name = CString::new(engine_name).map_err(|e| GfxError::InvalidDesc(e.to_string()))?;
        let app_info = vk::ApplicationInfo::default()
            .api_version(vk::API_VERSION_1_3) // 版本过低时，有些函数无法正确加载
            .application_name(app_name.as_ref())
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name.as_ref())
            .engine_version(vk::make_api_version(0, 1, 0, 0));

        let enabled_extensions = Self::get_extensions(vk_entry, extra_instance_exts)?;
        let mut enabled_extensions_str = String::new();
        for ext in &enabled_extensions {
            enabled_extensions_str.push_str(&format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) }));
        }
        log::info!("instance extensions: {}", enabled_extensions_str);

        let enabled_layers = Self::get_layers(vk_entry, enable_validation)?;
        let validation_enabled = !enabled_layers.is_empty();
        log::info!("validation layer enabled: {}", validation_enabled);

        let mut instance_ci = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&enabled_extensions)
            .enabled_layer_names(&enabled_layers);

        // instance 创建和销毁期间的消息也交给 debug messenger
        let mut debug_utils_messenger_ci = GfxDebugMessenger::debug_utils_messenger_ci();
        instance_ci = instance_ci.push_next(&mut debug_utils_messenger_ci);

        let ash_instance = unsafe { vk_entry.create_instance(&instance_ci, None) }.gfx_call("vkCreateInstance")?;

        Ok(Self {
            ash_instance,
            validation_enabled,
        })
    }
}

// destroy
impl GfxInstance {
    pub fn destroy(&mut self) {
        log::info!("destroying instance");
        unsafe {
            self.ash_instance.destroy_instance(None);
        }
    }
}

// getters
impl GfxInstance {
    #[inline]
    pub fn ash_instance(&self) -> &ash::Instance {
        &self.ash_instance
    }

    #[inline]
    pub fn vk_instance(&self) -> vk::Instance {
        self.ash_instance.handle()
    }

    #[inline]
    pub fn validation_enabled(&self) -> bool {
        self.validation_enabled
    }
}

// tools
impl GfxInstance {
    /// instance 所需的，且受支持的 extension
    fn get_extensions(vk_entry: &ash::Entry, extra_instance_exts: &[&'static CStr]) -> GfxResult<Vec<*const c_char>> {
        let all_ext_props = unsafe { vk_entry.enumerate_instance_extension_properties(None) }
            .gfx_call("vkEnumerateInstanceExtensionProperties")?;
        let mut enabled_extensions: HashSet<&'static CStr> = HashSet::new();

        for ext in extra_instance_exts.iter().chain(Self::basic_instance_exts().iter()) {
            let supported = all_ext_props
                .iter()
                .any(|supported_ext| supported_ext.extension_name_as_c_str().is_ok_and(|name| name == *ext));
            if !supported {
                log::error!("required instance extension {:?} is missing", ext);
                return Err(GfxError::Loading(format!("instance extension {:?} is not supported", ext)));
            }
            enabled_extensions.insert(*ext);
        }

        Ok(enabled_extensions.iter().map(|ext| ext.as_ptr()).collect_vec())
    }

    fn get_layers(vk_entry: &ash::Entry, enable_validation: bool) -> GfxResult<Vec<*const c_char>> {
        if !enable_validation {
            return Ok(Vec::new());
        }
        let all_layer_props =
            unsafe { vk_entry.enumerate_instance_layer_properties() }.gfx_call("vkEnumerateInstanceLayerProperties")?;
        let supported = all_layer_props
            .iter()
            .any(|available_layer| available_layer.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER));
        if !supported {
            log::warn!("validation requested but {:?} is not installed", VALIDATION_LAYER);
            return Ok(Vec::new());
        }
        Ok(vec![VALIDATION_LAYER.as_ptr()])
    }

    /// 必须要开启的 instance extensions
    fn basic_instance_exts() -> Vec<&'static CStr> {
        vec![
            // 这个 extension 可以单独使用，提供以下功能：
            // 1. debug messenger
            // 2. 为 vulkan object 设置 debug name
            // 3. 使用 label 标记 queue 或者 command buffer 中的一个一个 section
            vk::EXT_DEBUG_UTILS_NAME,
        ]
    }
}
