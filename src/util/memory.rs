use crate::util::constants::BYTES_IN_WORD;
use crate::util::Address;
use std::io::{Error, Result};
use sysinfo::{MemoryRefreshKind, RefreshKind, System};

/// Set a range of memory to 0.
pub fn zero(start: Address, len: usize) {
    set(start, 0, len);
}

/// Set a range of memory to the given value. Similar to memset.
pub fn set(start: Address, val: u8, len: usize) {
    unsafe {
        std::ptr::write_bytes(start.to_mut_ptr::<u8>(), val, len);
    }
}

/// Reserve and commit a contiguous, read-write, `align`-aligned range of
/// `size` bytes from the OS. The collector calls this exactly once at boot
/// for the heap proper; there is no further OS-level memory management.
///
/// Alignment is obtained by over-mapping and trimming the excess, so no
/// address-space hint is needed.
pub fn reserve_aligned(size: usize, align: usize) -> Result<Address> {
    debug_assert!(align.is_power_of_two());
    debug_assert!(size % align == 0);
    let prot = libc::PROT_READ | libc::PROT_WRITE;
    let flags = libc::MAP_ANON | libc::MAP_PRIVATE | libc::MAP_NORESERVE;
    let over = size + align;
    let raw = unsafe { libc::mmap(std::ptr::null_mut(), over, prot, flags, -1, 0) };
    if raw == libc::MAP_FAILED {
        return Err(Error::last_os_error());
    }
    let mapped = Address::from_mut_ptr(raw);
    let start = mapped.align_up(align);
    let head = start - mapped;
    let tail = (mapped + over) - (start + size);
    if head != 0 {
        wrap_libc_call(
            &|| unsafe { libc::munmap(mapped.to_mut_ptr(), head) },
            0,
        )?;
    }
    if tail != 0 {
        wrap_libc_call(
            &|| unsafe { libc::munmap((start + size).to_mut_ptr(), tail) },
            0,
        )?;
    }
    Ok(start)
}

/// Release a range previously obtained from [`reserve_aligned`].
pub fn release(start: Address, size: usize) -> Result<()> {
    wrap_libc_call(&|| unsafe { libc::munmap(start.to_mut_ptr(), size) }, 0)
}

/// Get the total physical memory of the machine, used for default heap sizing.
pub fn get_system_total_memory() -> u64 {
    let sys = System::new_with_specifics(
        RefreshKind::nothing().with_memory(MemoryRefreshKind::nothing().with_ram()),
    );
    sys.total_memory()
}

/// Dump RAM around an address, each line with the position of the
/// interesting address.
///
/// This function is only used for debugging fatal invariant violations, such
/// as a first-object-table entry out of sync with the cell layout. It logs
/// one word per line through the `error!` macro, then the caller aborts.
pub fn dump_ram_around_address(addr: Address, before_and_after_bytes: usize) {
    let start = (addr - before_and_after_bytes).align_down(BYTES_IN_WORD);
    let end = (addr + before_and_after_bytes).align_up(BYTES_IN_WORD);
    for cursor in start.iter_to(end, BYTES_IN_WORD) {
        let word: usize = unsafe { cursor.load() };
        let marker = if cursor == addr.align_down(BYTES_IN_WORD) {
            "=>"
        } else {
            "  "
        };
        error!("{} {} : {:#018x}", marker, cursor, word);
    }
}

pub fn wrap_libc_call<T: PartialEq>(f: &dyn Fn() -> T, expect: T) -> Result<()> {
    let ret = f();
    if ret == expect {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::constants::BYTES_IN_REGION;

    #[test]
    fn reserve_is_aligned_and_zeroed() {
        let start = reserve_aligned(BYTES_IN_REGION, BYTES_IN_REGION).unwrap();
        assert!(start.is_aligned_to(BYTES_IN_REGION));
        // Anonymous mappings are zero-filled.
        assert_eq!(unsafe { start.load::<usize>() }, 0);
        assert_eq!(
            unsafe { (start + BYTES_IN_REGION - BYTES_IN_WORD).load::<usize>() },
            0
        );
        release(start, BYTES_IN_REGION).unwrap();
    }

    #[test]
    fn zero_and_set() {
        let start = reserve_aligned(BYTES_IN_REGION, BYTES_IN_REGION).unwrap();
        set(start, 0xab, 64);
        assert_eq!(unsafe { start.load::<u8>() }, 0xab);
        zero(start, 64);
        assert_eq!(unsafe { start.load::<u8>() }, 0);
        release(start, BYTES_IN_REGION).unwrap();
    }
}
