//! Win32 registry backend
//!
//! Each call opens the target key with the WOW64 access flag matching the
//! requested view, performs one registry function and closes the handle.
//! On a 32-bit OS no view flag is passed, so REDIRECTED32 lands on the
//! native (and only) view.

#![allow(unsafe_code)]

use super::{codec, value_location, RegistryAccessor};
use crate::error::AccessError;
use crate::path::{Hive, HostArch, RegistryPath, View};
use crate::types::{ValueData, ValueName};
use std::ptr;
use tracing::trace;
use windows_sys::Win32::Foundation::{
    BOOL, ERROR_FILE_NOT_FOUND, ERROR_MORE_DATA, ERROR_NO_MORE_ITEMS, ERROR_PATH_NOT_FOUND,
    ERROR_SUCCESS, WIN32_ERROR,
};
use windows_sys::Win32::System::Registry::{
    RegCloseKey, RegCreateKeyExW, RegDeleteKeyExW, RegDeleteTreeW, RegDeleteValueW,
    RegEnumKeyExW, RegEnumValueW, RegOpenKeyExW, RegQueryValueExW, RegSetValueExW, HKEY,
    HKEY_CLASSES_ROOT, HKEY_CURRENT_CONFIG, HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE, HKEY_USERS,
    KEY_ALL_ACCESS, KEY_READ, KEY_SET_VALUE, KEY_WOW64_32KEY, KEY_WOW64_64KEY, KEY_WRITE,
    REG_OPTION_NON_VOLATILE, REG_SAM_FLAGS,
};
use windows_sys::Win32::System::Threading::{GetCurrentProcess, IsWow64Process};

// Limits documented for registry element names, in UTF-16 units.
const MAX_KEY_NAME: usize = 256;
const MAX_VALUE_NAME: usize = 16_384;

/// Whether the operating system is 64-bit, even from a 32-bit process
pub(crate) fn is_64bit_os() -> bool {
    if cfg!(target_pointer_width = "64") {
        return true;
    }
    let mut wow64: BOOL = 0;
    // SAFETY: GetCurrentProcess returns a pseudo handle that needs no
    // closing; `wow64` is a valid out pointer for the call's duration.
    let ok = unsafe { IsWow64Process(GetCurrentProcess(), &mut wow64) };
    ok != 0 && wow64 != 0
}

/// Registry accessor backed by the Win32 API
#[derive(Debug, Clone, Copy)]
pub struct WindowsRegistry {
    host: HostArch,
}

impl Default for WindowsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowsRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            host: HostArch::detect(),
        }
    }

    fn view_flags(&self, view: View) -> REG_SAM_FLAGS {
        match (self.host, view) {
            (HostArch::X86, _) => 0,
            (HostArch::X64, View::Native) => KEY_WOW64_64KEY,
            (HostArch::X64, View::Redirected32) => KEY_WOW64_32KEY,
        }
    }

    fn open(&self, path: &RegistryPath, access: REG_SAM_FLAGS) -> Result<OwnedKey, AccessError> {
        let subkey = wide(&path.subkey());
        let mut handle: HKEY = ptr::null_mut();
        // SAFETY: `subkey` is NUL-terminated and outlives the call;
        // `handle` is a valid out pointer.
        let status = unsafe {
            RegOpenKeyExW(
                root(path.hive()),
                subkey.as_ptr(),
                0,
                access | self.view_flags(path.view()),
                &mut handle,
            )
        };
        check(status, || path.to_string())?;
        Ok(OwnedKey(handle))
    }
}

/// Open key handle closed on drop
struct OwnedKey(HKEY);

impl Drop for OwnedKey {
    fn drop(&mut self) {
        // SAFETY: the handle came from a successful open/create call and is
        // closed exactly once.
        unsafe {
            RegCloseKey(self.0);
        }
    }
}

fn root(hive: Hive) -> HKEY {
    match hive {
        Hive::LocalMachine => HKEY_LOCAL_MACHINE,
        Hive::CurrentUser => HKEY_CURRENT_USER,
        Hive::Users => HKEY_USERS,
        Hive::ClassesRoot => HKEY_CLASSES_ROOT,
        Hive::CurrentConfig => HKEY_CURRENT_CONFIG,
    }
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn check(status: WIN32_ERROR, location: impl FnOnce() -> String) -> Result<(), AccessError> {
    match status {
        ERROR_SUCCESS => Ok(()),
        ERROR_FILE_NOT_FOUND | ERROR_PATH_NOT_FOUND => Err(AccessError::NotFound(location())),
        code => Err(AccessError::Os {
            location: location(),
            code: code as i32,
            message: std::io::Error::from_raw_os_error(code as i32).to_string(),
        }),
    }
}

fn query_value(
    key: &OwnedKey,
    path: &RegistryPath,
    name: &ValueName,
) -> Result<ValueData, AccessError> {
    let name_w = wide(name.as_str());
    let mut raw_type = 0u32;
    let mut len = 0u32;
    // SAFETY: size query; a null data pointer is allowed when only the
    // length is requested.
    let status = unsafe {
        RegQueryValueExW(
            key.0,
            name_w.as_ptr(),
            ptr::null(),
            &mut raw_type,
            ptr::null_mut(),
            &mut len,
        )
    };
    check(status, || value_location(path, name))?;

    let mut buffer = vec![0u8; len as usize];
    loop {
        len = buffer.len() as u32;
        // SAFETY: `buffer` holds `len` writable bytes.
        let status = unsafe {
            RegQueryValueExW(
                key.0,
                name_w.as_ptr(),
                ptr::null(),
                &mut raw_type,
                buffer.as_mut_ptr(),
                &mut len,
            )
        };
        if status == ERROR_MORE_DATA {
            buffer.resize(len as usize, 0);
            continue;
        }
        check(status, || value_location(path, name))?;
        break;
    }
    buffer.truncate(len as usize);

    codec::decode(raw_type, &buffer).ok_or_else(|| AccessError::InvalidData {
        location: value_location(path, name),
        raw_type,
    })
}

impl RegistryAccessor for WindowsRegistry {
    fn host_arch(&self) -> HostArch {
        self.host
    }

    fn exists(&self, path: &RegistryPath) -> Result<bool, AccessError> {
        match self.open(path, KEY_READ) {
            Ok(_) => Ok(true),
            Err(AccessError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn create(&self, path: &RegistryPath) -> Result<(), AccessError> {
        if path.is_hive_root() {
            return Err(AccessError::HiveRoot(path.to_string()));
        }
        trace!(%path, "RegCreateKeyExW");
        let subkey = wide(&path.subkey());
        let mut handle: HKEY = ptr::null_mut();
        // SAFETY: `subkey` is NUL-terminated; class, security attributes and
        // disposition are optional and passed as null.
        let status = unsafe {
            RegCreateKeyExW(
                root(path.hive()),
                subkey.as_ptr(),
                0,
                ptr::null(),
                REG_OPTION_NON_VOLATILE,
                KEY_WRITE | self.view_flags(path.view()),
                ptr::null(),
                &mut handle,
                ptr::null_mut(),
            )
        };
        check(status, || path.to_string())?;
        drop(OwnedKey(handle));
        Ok(())
    }

    fn delete(&self, path: &RegistryPath, recursive: bool) -> Result<(), AccessError> {
        if path.is_hive_root() {
            return Err(AccessError::HiveRoot(path.to_string()));
        }
        if recursive {
            let key = self.open(path, KEY_ALL_ACCESS)?;
            trace!(%path, "RegDeleteTreeW");
            // SAFETY: a null subkey deletes the contents of the open key.
            let status = unsafe { RegDeleteTreeW(key.0, ptr::null()) };
            check(status, || path.to_string())?;
        } else if !self.list_subkeys(path)?.is_empty() {
            return Err(AccessError::NotEmpty(path.to_string()));
        }

        let subkey = wide(&path.subkey());
        trace!(%path, "RegDeleteKeyExW");
        // SAFETY: `subkey` is NUL-terminated and outlives the call.
        let status = unsafe {
            RegDeleteKeyExW(
                root(path.hive()),
                subkey.as_ptr(),
                self.view_flags(path.view()),
                0,
            )
        };
        check(status, || path.to_string())
    }

    fn list_subkeys(&self, path: &RegistryPath) -> Result<Vec<String>, AccessError> {
        let key = self.open(path, KEY_READ)?;
        let mut names = Vec::new();
        let mut buffer = [0u16; MAX_KEY_NAME];
        for index in 0.. {
            let mut len = buffer.len() as u32;
            // SAFETY: `buffer` holds `len` UTF-16 units; the optional class
            // and timestamp outputs are null.
            let status = unsafe {
                RegEnumKeyExW(
                    key.0,
                    index,
                    buffer.as_mut_ptr(),
                    &mut len,
                    ptr::null(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                )
            };
            if status == ERROR_NO_MORE_ITEMS {
                break;
            }
            check(status, || path.to_string())?;
            names.push(String::from_utf16_lossy(&buffer[..len as usize]));
        }
        Ok(names)
    }

    fn list_values(&self, path: &RegistryPath) -> Result<Vec<(ValueName, ValueData)>, AccessError> {
        let key = self.open(path, KEY_READ)?;
        self.list_value_names(path)?
            .into_iter()
            .map(|name| query_value(&key, path, &name).map(|data| (name, data)))
            .collect()
    }

    fn list_value_names(&self, path: &RegistryPath) -> Result<Vec<ValueName>, AccessError> {
        let key = self.open(path, KEY_READ)?;
        let mut names = Vec::new();
        let mut buffer = vec![0u16; MAX_VALUE_NAME];
        for index in 0.. {
            let mut len = buffer.len() as u32;
            // SAFETY: `buffer` holds `len` UTF-16 units; type and data
            // outputs are not requested.
            let status = unsafe {
                RegEnumValueW(
                    key.0,
                    index,
                    buffer.as_mut_ptr(),
                    &mut len,
                    ptr::null(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                )
            };
            if status == ERROR_NO_MORE_ITEMS {
                break;
            }
            check(status, || path.to_string())?;
            names.push(ValueName::new(String::from_utf16_lossy(&buffer[..len as usize])));
        }
        Ok(names)
    }

    fn get_value(&self, path: &RegistryPath, name: &ValueName) -> Result<ValueData, AccessError> {
        let key = match self.open(path, KEY_READ) {
            Err(AccessError::NotFound(_)) => {
                return Err(AccessError::NotFound(value_location(path, name)))
            }
            other => other?,
        };
        query_value(&key, path, name)
    }

    fn set_value(
        &self,
        path: &RegistryPath,
        name: &ValueName,
        data: &ValueData,
    ) -> Result<(), AccessError> {
        let key = self.open(path, KEY_SET_VALUE)?;
        let name_w = wide(name.as_str());
        let (raw_type, bytes) = codec::encode(data);
        trace!(%path, name = name.as_str(), raw_type, "RegSetValueExW");
        // SAFETY: `name_w` is NUL-terminated and `bytes` holds exactly the
        // advertised number of bytes.
        let status = unsafe {
            RegSetValueExW(
                key.0,
                name_w.as_ptr(),
                0,
                raw_type,
                bytes.as_ptr(),
                bytes.len() as u32,
            )
        };
        check(status, || value_location(path, name))
    }

    fn delete_value(&self, path: &RegistryPath, name: &ValueName) -> Result<(), AccessError> {
        let key = match self.open(path, KEY_SET_VALUE) {
            Err(AccessError::NotFound(_)) => {
                return Err(AccessError::NotFound(value_location(path, name)))
            }
            other => other?,
        };
        let name_w = wide(name.as_str());
        // SAFETY: `name_w` is NUL-terminated and outlives the call.
        let status = unsafe { RegDeleteValueW(key.0, name_w.as_ptr()) };
        check(status, || value_location(path, name))
    }
}
