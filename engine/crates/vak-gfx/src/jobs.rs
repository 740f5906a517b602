use anyhow::Context;
use crossbeam_utils::sync::WaitGroup;
use parking_lot::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GfxJobPriority {
    /// 当前帧就需要结果的任务
    High,
    /// 后台任务，例如资源加载
    Normal,
}

pub type GfxJob = Box<dyn FnOnce() + Send + 'static>;

/// 把任务分发到工作线程
///
/// 任务中可以调用 [`Gfx`](crate::gfx::Gfx) 的资源创建接口，资源池的修改由 Gfx 内部的锁串行化
pub trait GfxJobDispatcher: Send + Sync {
    fn dispatch(&self, job: GfxJob, priority: GfxJobPriority);

    /// 阻塞直到所有已经分发的任务结束
    fn wait_all(&self);
}

/// 基于 rayon 线程池的实现
///
/// 高优先级任务使用独立的线程池，不会排在后台任务后面
pub struct RayonDispatcher {
    high: rayon::ThreadPool,
    normal: rayon::ThreadPool,

    /// 每个任务持有一份 clone，任务结束时 drop
    wait_group: Mutex<WaitGroup>,
}

// new & init
impl RayonDispatcher {
    /// `normal_threads` 为 0 时由 rayon 决定线程数
    pub fn new(high_threads: usize, normal_threads: usize) -> anyhow::Result<Self> {
        let high = rayon::ThreadPoolBuilder::new()
            .num_threads(high_threads.max(1))
            .thread_name(|index| format!("Gfx-Job-High-{}", index))
            .panic_handler(|_| log::error!("high priority gfx job panicked"))
            .build()
            .context("failed to create high priority job pool")?;
        let normal = rayon::ThreadPoolBuilder::new()
            .num_threads(normal_threads)
            .thread_name(|index| format!("Gfx-Job-{}", index))
            .panic_handler(|_| log::error!("gfx job panicked"))
            .build()
            .context("failed to create job pool")?;

        log::info!(
            "job dispatcher created: {} high priority threads, {} threads",
            high.current_num_threads(),
            normal.current_num_threads()
        );
        Ok(Self {
            high,
            normal,
            wait_group: Mutex::new(WaitGroup::new()),
        })
    }
}

impl GfxJobDispatcher for RayonDispatcher {
    fn dispatch(&self, job: GfxJob, priority: GfxJobPriority) {
        let wg_task = self.wait_group.lock().clone();
        let pool = match priority {
            GfxJobPriority::High => &self.high,
            GfxJobPriority::Normal => &self.normal,
        };
        pool.spawn(move || {
            let _span = profile_span!("GfxJob");
            job();
            drop(wg_task);
        });
    }

    fn wait_all(&self) {
        let _span = profile_span!("RayonDispatcher::wait_all");
        let wait_group = std::mem::replace(&mut *self.wait_group.lock(), WaitGroup::new());
        wait_group.wait();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use ash::vk;

    use super::*;
    use crate::{
        backend::mock::MockBackend, config::GfxConfig, gfx::Gfx, resources::buffer::GfxBufferDesc,
    };

    #[test]
    fn test_wait_all_blocks_until_jobs_finish() {
        let dispatcher = RayonDispatcher::new(1, 2).unwrap();
        let counter = Arc::new(AtomicU32::new(0));

        for idx in 0..32 {
            let counter = counter.clone();
            let priority = if idx % 4 == 0 {
                GfxJobPriority::High
            } else {
                GfxJobPriority::Normal
            };
            dispatcher.dispatch(
                Box::new(move || {
                    std::thread::sleep(std::time::Duration::from_millis(1));
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                priority,
            );
        }
        dispatcher.wait_all();
        assert_eq!(counter.load(Ordering::SeqCst), 32);

        // 再次等待不会阻塞
        dispatcher.wait_all();
    }

    #[test]
    fn test_concurrent_resource_creation() {
        let mock = Arc::new(MockBackend::new());
        let config = GfxConfig {
            max_buffers: 64,
            max_textures: 8,
            max_samplers: 4,
            staging_capacity: 4096,
            ..Default::default()
        };
        let gfx = Arc::new(Gfx::new(mock.clone(), config).unwrap());
        let dispatcher = RayonDispatcher::new(2, 4).unwrap();
        let handles = Arc::new(Mutex::new(Vec::new()));

        for idx in 0..48u64 {
            let gfx = gfx.clone();
            let handles = handles.clone();
            dispatcher.dispatch(
                Box::new(move || {
                    let data = idx.to_le_bytes();
                    let handle = gfx
                        .create_buffer(&GfxBufferDesc {
                            usage: vk::BufferUsageFlags::STORAGE_BUFFER,
                            size: 64,
                            initial_data: Some(data.as_slice()),
                            debug_name: "job-buffer",
                            ..Default::default()
                        })
                        .unwrap();
                    handles.lock().push(handle);
                }),
                GfxJobPriority::Normal,
            );
        }
        dispatcher.wait_all();

        let mut handles = handles.lock().clone();
        assert_eq!(handles.len(), 48);
        handles.sort_by_key(|handle| handle.index());
        handles.dedup_by_key(|handle| handle.index());
        assert_eq!(handles.len(), 48);
        assert_eq!(gfx.resources().stats().live_buffers, 48);

        let Ok(mut gfx) = Arc::try_unwrap(gfx) else {
            panic!("gfx is still shared");
        };
        gfx.destroy().unwrap();
        assert_eq!(mock.live_buffer_count(), 0);
    }
}
