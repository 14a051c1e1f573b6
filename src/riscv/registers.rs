// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

/// Number of registers GDB expects for RV32I: x0-x31 followed by pc
pub const REGISTER_COUNT: usize = 33;

/// Debug module register number of the first general purpose register
pub const GPR_BASE: u16 = 0x1000;
pub const DCSR: u16 = 0x7b0;
/// The debug PC, which holds the hart's pc while it is halted
pub const DPC: u16 = 0x7b1;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RegisterDescriptor
{
	pub name: &'static str,
	pub abi_name: &'static str,
	pub number: u16,
}

const fn gpr(index: u16, abi_name: &'static str, name: &'static str) -> RegisterDescriptor
{
	RegisterDescriptor {
		name,
		abi_name,
		number: GPR_BASE + index,
	}
}

/// Register table in GDB's `g` packet order
pub const REGISTERS: [RegisterDescriptor; REGISTER_COUNT] = [
	gpr(0, "zero", "x0"),
	gpr(1, "ra", "x1"),
	gpr(2, "sp", "x2"),
	gpr(3, "gp", "x3"),
	gpr(4, "tp", "x4"),
	gpr(5, "t0", "x5"),
	gpr(6, "t1", "x6"),
	gpr(7, "t2", "x7"),
	gpr(8, "s0", "x8"),
	gpr(9, "s1", "x9"),
	gpr(10, "a0", "x10"),
	gpr(11, "a1", "x11"),
	gpr(12, "a2", "x12"),
	gpr(13, "a3", "x13"),
	gpr(14, "a4", "x14"),
	gpr(15, "a5", "x15"),
	gpr(16, "a6", "x16"),
	gpr(17, "a7", "x17"),
	gpr(18, "s2", "x18"),
	gpr(19, "s3", "x19"),
	gpr(20, "s4", "x20"),
	gpr(21, "s5", "x21"),
	gpr(22, "s6", "x22"),
	gpr(23, "s7", "x23"),
	gpr(24, "s8", "x24"),
	gpr(25, "s9", "x25"),
	gpr(26, "s10", "x26"),
	gpr(27, "s11", "x27"),
	gpr(28, "t3", "x28"),
	gpr(29, "t4", "x29"),
	gpr(30, "t5", "x30"),
	gpr(31, "t6", "x31"),
	RegisterDescriptor {
		name: "pc",
		abi_name: "pc",
		number: DPC,
	},
];

/// Position of a register in the table, by architectural or ABI name
pub fn index_of(name: &str) -> Option<usize>
{
	let name = name.to_ascii_lowercase();
	// `fp` is the second ABI name of s0
	let name = if name == "fp" { "s0" } else { name.as_str() };
	REGISTERS
		.iter()
		.position(|register| register.name == name || register.abi_name == name)
}

/// Debug module register number for a name, including the debug CSRs outside the `g` set
pub fn register_number(name: &str) -> Option<u16>
{
	match name.to_ascii_lowercase().as_str() {
		"dcsr" => Some(DCSR),
		"dpc" => Some(DPC),
		_ => index_of(name).map(|index| REGISTERS[index].number),
	}
}

/// Cached view of the hart's registers, in [REGISTERS] order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuRegisterFile
{
	values: [u32; REGISTER_COUNT],
}

impl Default for CpuRegisterFile
{
	fn default() -> Self
	{
		Self {
			values: [0; REGISTER_COUNT],
		}
	}
}

impl CpuRegisterFile
{
	pub const PC_INDEX: usize = REGISTER_COUNT - 1;

	pub fn get(&self, index: usize) -> Option<u32>
	{
		self.values.get(index).copied()
	}

	pub fn set(&mut self, index: usize, value: u32) -> Option<()>
	{
		*self.values.get_mut(index)? = value;
		Some(())
	}

	pub fn by_name(&self, name: &str) -> Option<u32>
	{
		index_of(name).and_then(|index| self.get(index))
	}

	pub fn pc(&self) -> u32
	{
		self.values[Self::PC_INDEX]
	}

	pub fn values(&self) -> &[u32; REGISTER_COUNT]
	{
		&self.values
	}

	/// Pair each value with its register description
	pub fn iter(&self) -> impl Iterator<Item = (&'static RegisterDescriptor, u32)> + '_
	{
		REGISTERS.iter().zip(self.values.iter().copied())
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn names_resolve_to_debug_module_numbers()
	{
		assert_eq!(register_number("zero"), Some(0x1000));
		assert_eq!(register_number("gp"), Some(0x1003));
		assert_eq!(register_number("tp"), Some(0x1004));
		assert_eq!(register_number("x31"), Some(0x101f));
		assert_eq!(register_number("fp"), Some(0x1008));
		assert_eq!(register_number("PC"), Some(DPC));
		assert_eq!(register_number("dcsr"), Some(DCSR));
		assert_eq!(register_number("mstatus"), None);
	}

	#[test]
	fn register_file_indexes()
	{
		let mut registers = CpuRegisterFile::default();
		assert_eq!(registers.set(CpuRegisterFile::PC_INDEX, 0x8000_0000), Some(()));
		assert_eq!(registers.set(REGISTER_COUNT, 1), None);
		assert_eq!(registers.pc(), 0x8000_0000);
		assert_eq!(registers.by_name("pc"), Some(0x8000_0000));
		assert_eq!(registers.iter().count(), REGISTER_COUNT);
	}
}
