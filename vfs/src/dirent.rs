use alloc::string::String;

/// `readdir`所交换的目录项
#[derive(Debug)]
pub struct DirEntry {
    /// 项所指inode记录的扇区号
    pub inode: u64,
    pub ty: DirEntryType,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DirEntryType {
    Directory,
    SymLink,
    #[default]
    Regular,
}
