use std::{
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
};

/// 指向 [`HandlePool`](crate::pool::handle_pool::HandlePool) 中某个 slot 的强类型 handle
///
/// - `index`: slot 的下标，同时也是该资源在 bindless descriptor 数组中的下标
/// - `generation`: 创建时 slot 的 generation，0 表示无效 handle
///
/// 泛型 `T` 只用于区分类型，handle 本身不持有 `T`
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// 无效 handle，永远无法解析成功
    pub const NULL: Self = Self::new(0, 0);

    #[inline]
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.generation == 0
    }

    /// 打包成一个 u64：高 32 位是 generation，低 32 位是 index
    #[inline]
    pub fn to_bits(&self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    #[inline]
    pub fn from_bits(bits: u64) -> Self {
        Self::new(bits as u32, (bits >> 32) as u32)
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::NULL
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_bits().hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let type_name = std::any::type_name::<T>().rsplit("::").next().unwrap_or("?");
        write!(f, "Handle<{}>({}v{})", type_name, self.index, self.generation)
    }
}
