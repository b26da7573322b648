/// 文件系统操作的错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// 路径成分或名称不存在
    NotFound,
    /// 创建目标重名
    AlreadyExists,
    /// 空闲簇耗尽，磁盘已满
    Exhausted,
    /// 路径成分过长，或磁盘记录校验失败
    Invalid,
    /// 写入被deny_write拒绝
    WriteDenied,
    /// 簇链表损坏，仅波及所属inode的操作
    Corruption,
    /// 中间成分或chdir目标不是目录
    NotADirectory,
}
