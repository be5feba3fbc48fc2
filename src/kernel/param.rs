pub const NFILE: usize = 64; // open files per system
pub const MAXPATH: usize = 128; // maximum file path length
pub const MAXNAME: usize = 255; // maximum path component length
pub const ROOTDEV: u32 = 1; // device number of root disk
