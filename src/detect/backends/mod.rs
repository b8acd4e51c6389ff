pub mod cpu;

pub use cpu::CpuVision;
