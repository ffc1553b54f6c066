pub mod control_plane;
pub mod dispatcher;
pub mod emulated_control_plane;
pub mod ryu_control_plane;
