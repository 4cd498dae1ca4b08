//! ASCII PCD and PLY readers and writers over the host interchange record.

pub mod pcd;
pub mod ply;

pub use pcd::{read_pcd, write_pcd};
pub use ply::{read_ply, write_ply, PlyCloud};

pub use gpc_core::{Error, Result};
