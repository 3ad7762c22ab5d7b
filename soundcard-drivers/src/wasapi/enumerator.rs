//! Endpoint enumeration via the MMDevice API.
//!
//! Wraps `IMMDeviceEnumerator` to list active capture and render endpoints
//! with their friendly names, and to reopen an endpoint by id.

use windows::core::PCWSTR;
use windows::Win32::Devices::FunctionDiscovery::*;
use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::StructuredStorage::PropVariantClear;
use windows::Win32::System::Com::*;
use windows::Win32::System::Variant::*;

use soundcard_core::{Direction, SoundCardError};

/// One active endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub id: String,
    pub name: String,
    pub direction: Direction,
    pub is_default: bool,
}

/// Initializes COM (MTA) on the current thread for its lifetime.
pub struct ComGuard {
    initialized: bool,
}

impl ComGuard {
    pub fn new() -> Result<Self, SoundCardError> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr.is_ok() {
            return Ok(Self { initialized: true });
        }
        // already initialized as STA by the host application: usable as is
        if hr == RPC_E_CHANGED_MODE {
            return Ok(Self { initialized: false });
        }
        Err(SoundCardError::Backend(format!("CoInitializeEx failed: {:?}", hr)))
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        if self.initialized {
            unsafe { CoUninitialize() };
        }
    }
}

/// Endpoint enumerator. Requires COM on the calling thread.
pub struct Endpoints {
    enumerator: IMMDeviceEnumerator,
}

impl Endpoints {
    pub fn new() -> Result<Self, SoundCardError> {
        unsafe {
            let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                .map_err(|e| SoundCardError::Backend(format!("failed to create enumerator: {}", e)))?;
            Ok(Self { enumerator })
        }
    }

    /// Active capture endpoints followed by active render endpoints.
    pub fn list(&self) -> Result<Vec<EndpointInfo>, SoundCardError> {
        let mut all = self.list_flow(eCapture, Direction::Capture)?;
        all.extend(self.list_flow(eRender, Direction::Playback)?);
        Ok(all)
    }

    /// Reopen an endpoint by id.
    pub fn device(&self, id: &str) -> Result<IMMDevice, SoundCardError> {
        let wide_id: Vec<u16> = id.encode_utf16().chain(std::iter::once(0)).collect();
        unsafe {
            self.enumerator
                .GetDevice(PCWSTR(wide_id.as_ptr()))
                .map_err(|_| SoundCardError::DeviceNotFound(id.to_string()))
        }
    }

    fn list_flow(&self, data_flow: EDataFlow, direction: Direction) -> Result<Vec<EndpointInfo>, SoundCardError> {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(data_flow, DEVICE_STATE_ACTIVE)
                .map_err(|e| SoundCardError::Backend(format!("EnumAudioEndpoints failed: {}", e)))?;
            let count = collection
                .GetCount()
                .map_err(|e| SoundCardError::Backend(format!("GetCount failed: {}", e)))?;

            let default_id = self
                .enumerator
                .GetDefaultAudioEndpoint(data_flow, eConsole)
                .ok()
                .and_then(|d| d.GetId().ok())
                .and_then(|id| id.to_string().ok());

            let mut endpoints = Vec::new();
            for i in 0..count {
                let device = match collection.Item(i) {
                    Ok(d) => d,
                    Err(_) => continue,
                };
                let id = match device.GetId() {
                    Ok(id) => id.to_string().unwrap_or_default(),
                    Err(_) => continue,
                };
                let name = friendly_name(&device).unwrap_or_else(|| format!("Endpoint {}", i));
                let is_default = default_id.as_deref() == Some(id.as_str());
                endpoints.push(EndpointInfo {
                    id,
                    name,
                    direction,
                    is_default,
                });
            }
            // the default endpoint first, so the registry defaults follow the system
            endpoints.sort_by_key(|e| !e.is_default);
            Ok(endpoints)
        }
    }
}

/// PKEY_Device_FriendlyName of an endpoint.
fn friendly_name(device: &IMMDevice) -> Option<String> {
    unsafe {
        let store = device.OpenPropertyStore(STGM_READ).ok()?;
        let mut prop = std::mem::zeroed::<PROPVARIANT>();
        store.GetValue(&PKEY_Device_FriendlyName, &mut prop).ok()?;

        let name = if prop.Anonymous.Anonymous.vt == VT_LPWSTR {
            let pwsz = prop.Anonymous.Anonymous.Anonymous.pwszVal;
            if pwsz.is_null() {
                None
            } else {
                let len = (0..).take_while(|&i| *pwsz.offset(i) != 0).count();
                Some(String::from_utf16_lossy(std::slice::from_raw_parts(pwsz, len)))
            }
        } else {
            None
        };

        PropVariantClear(&mut prop).ok();
        name
    }
}
