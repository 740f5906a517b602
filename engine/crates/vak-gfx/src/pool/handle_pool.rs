use crate::{
    error::{GfxError, GfxResult},
    pool::handle::Handle,
};

/// 固定容量的 slot 数组 + LIFO free list
///
/// - 热数据 `H`（渲染时频繁访问）和冷数据 `M`（debug name、创建参数等）分开存放
/// - 每个 slot 的 generation 从 1 开始，每次 delete 加一，永远不会回退
/// - 容量在创建时确定，不会增长：slot 的下标同时是 bindless 数组的下标
pub struct HandlePool<H: Default, M: Default = ()> {
    name: &'static str,

    hot: Vec<H>,
    cold: Vec<M>,
    generations: Vec<u32>,
    live: Vec<bool>,

    /// 栈顶是下一个被分配的 slot
    free_list: Vec<u32>,
    live_count: u32,
}

// new & init
impl<H: Default, M: Default> HandlePool<H, M> {
    pub fn new(name: &'static str, capacity: u32) -> Self {
        let mut hot = Vec::with_capacity(capacity as usize);
        hot.resize_with(capacity as usize, H::default);
        let mut cold = Vec::with_capacity(capacity as usize);
        cold.resize_with(capacity as usize, M::default);

        // 倒序压栈，使得下标小的 slot 先被分配
        let free_list = (0..capacity).rev().collect();

        log::debug!("created {} pool with {} slots", name, capacity);

        Self {
            name,
            hot,
            cold,
            generations: vec![1; capacity as usize],
            live: vec![false; capacity as usize],
            free_list,
            live_count: 0,
        }
    }
}

// getters
impl<H: Default, M: Default> HandlePool<H, M> {
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.hot.len() as u32
    }

    /// 当前存活的资源数量
    #[inline]
    pub fn len(&self) -> u32 {
        self.live_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    /// free list 为空时，下一次 create 必定失败
    #[inline]
    pub fn is_full(&self) -> bool {
        self.free_list.is_empty()
    }

    #[inline]
    pub fn is_valid(&self, handle: Handle<H>) -> bool {
        self.check(handle).is_ok()
    }

    pub fn get(&self, handle: Handle<H>) -> GfxResult<&H> {
        let index = self.check(handle)?;
        Ok(&self.hot[index])
    }

    pub fn get_mut(&mut self, handle: Handle<H>) -> GfxResult<&mut H> {
        let index = self.check(handle)?;
        Ok(&mut self.hot[index])
    }

    pub fn get_metadata(&self, handle: Handle<H>) -> GfxResult<&M> {
        let index = self.check(handle)?;
        Ok(&self.cold[index])
    }

    pub fn get_metadata_mut(&mut self, handle: Handle<H>) -> GfxResult<&mut M> {
        let index = self.check(handle)?;
        Ok(&mut self.cold[index])
    }

    /// 用 slot 当前的 generation 重建 handle，只用于枚举
    ///
    /// 对于空闲的 slot 也会返回 handle，调用方需要结合 [`Self::is_live_index`] 使用
    pub fn handle_at(&self, index: u32) -> Option<Handle<H>> {
        self.generations.get(index as usize).map(|&generation| Handle::new(index, generation))
    }

    #[inline]
    pub fn is_live_index(&self, index: u32) -> bool {
        self.live.get(index as usize).copied().unwrap_or(false)
    }

    /// 按下标从小到大枚举所有存活的 handle
    pub fn live_handles(&self) -> impl Iterator<Item = Handle<H>> + '_ {
        self.live
            .iter()
            .enumerate()
            .filter(|(_, live)| **live)
            .map(|(index, _)| Handle::new(index as u32, self.generations[index]))
    }

    /// 按下标遍历所有 slot，空闲 slot 为 None
    pub fn iter_slots(&self) -> impl Iterator<Item = Option<&H>> + '_ {
        self.hot.iter().zip(self.live.iter()).map(|(hot, live)| live.then_some(hot))
    }
}

// create & delete
impl<H: Default, M: Default> HandlePool<H, M> {
    pub fn create(&mut self, hot: H, cold: M) -> GfxResult<Handle<H>> {
        let Some(index) = self.free_list.pop() else {
            log::error!("{} pool is full ({} slots)", self.name, self.capacity());
            return Err(GfxError::ResourceExhausted {
                pool: self.name,
                capacity: self.capacity(),
            });
        };

        let slot = index as usize;
        self.hot[slot] = hot;
        self.cold[slot] = cold;
        self.live[slot] = true;
        self.live_count += 1;

        Ok(Handle::new(index, self.generations[slot]))
    }

    /// 释放 slot，返回其中的数据，由调用方负责销毁对应的 GPU 对象
    ///
    /// 调用之后，之前发出的所有指向该 slot 的 handle 都会失效
    pub fn delete(&mut self, handle: Handle<H>) -> GfxResult<(H, M)> {
        let slot = self.check(handle)?;

        let hot = std::mem::take(&mut self.hot[slot]);
        let cold = std::mem::take(&mut self.cold[slot]);
        self.live[slot] = false;
        self.live_count -= 1;

        if self.generations[slot] == u32::MAX {
            // generation 不能回绕到 0，这个 slot 永久退役
            log::warn!("{} pool slot {} exhausted its generations, retiring it", self.name, slot);
        } else {
            self.generations[slot] += 1;
            self.free_list.push(handle.index());
        }

        Ok((hot, cold))
    }

    #[inline]
    fn check(&self, handle: Handle<H>) -> GfxResult<usize> {
        let slot = handle.index() as usize;
        let valid = slot < self.generations.len() && self.live[slot] && self.generations[slot] == handle.generation();
        if valid {
            Ok(slot)
        } else {
            Err(GfxError::StaleHandle {
                pool: self.name,
                index: handle.index(),
                generation: handle.generation(),
            })
        }
    }
}
