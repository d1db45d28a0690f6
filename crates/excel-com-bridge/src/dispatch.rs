//! Safe wrapper around IDispatch for late-bound COM automation.
//!
//! Excel's COM API is primarily accessed through IDispatch (like VBScript late-binding).
//! This module provides helpers for property get/set and method invocation,
//! including named arguments (`sheet.Copy After:=other`).

#![cfg(windows)]

use std::mem::ManuallyDrop;
use std::ptr;

use windows::{
    core::{BSTR, GUID, HSTRING, PCWSTR},
    Win32::{
        Foundation::{DISP_E_EXCEPTION, VARIANT_BOOL},
        Globalization::GetSystemDefaultLCID,
        System::{
            Com::{
                CLSIDFromProgID, CoCreateInstance, IDispatch, CLSCTX_LOCAL_SERVER, DISPATCH_FLAGS,
                DISPATCH_METHOD, DISPATCH_PROPERTYGET, DISPATCH_PROPERTYPUT, DISPPARAMS, EXCEPINFO,
            },
            Ole::DISPID_PROPERTYPUT,
            Variant::{VARIANT, VT_BOOL, VT_BSTR, VT_DISPATCH, VT_EMPTY, VT_I2, VT_I4, VT_NULL},
        },
    },
};

// -- VARIANT construction helpers --
// The VARIANT struct wraps inner unions in ManuallyDrop, so we use ptr::write
// to set fields without triggering the DerefMut lint.

/// Create a VARIANT containing a bool.
pub fn variant_bool(val: bool) -> VARIANT {
    unsafe {
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_BOOL);
        ptr::write(
            &mut inner.Anonymous.boolVal,
            VARIANT_BOOL(if val { -1 } else { 0 }),
        );
        v
    }
}

/// Create a VARIANT containing an i32.
pub fn variant_i32(val: i32) -> VARIANT {
    unsafe {
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_I4);
        ptr::write(&mut inner.Anonymous.lVal, val);
        v
    }
}

/// Create a VARIANT containing a BSTR string.
pub fn variant_str(val: &str) -> VARIANT {
    unsafe {
        let bstr = BSTR::from(val);
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_BSTR);
        ptr::write(&mut inner.Anonymous.bstrVal, ManuallyDrop::new(bstr));
        v
    }
}

/// Create a VARIANT holding a COM object reference.
pub fn variant_dispatch(obj: &DispatchObject) -> VARIANT {
    unsafe {
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_DISPATCH);
        ptr::write(
            &mut inner.Anonymous.pdispVal,
            ManuallyDrop::new(Some(obj.inner.clone())),
        );
        v
    }
}

/// Get the VT type of a VARIANT.
pub fn variant_vt(v: &VARIANT) -> u16 {
    unsafe { v.Anonymous.Anonymous.vt.0 }
}

/// Extract an integer from a VARIANT (`Count` comes back as VT_I4).
pub fn variant_get_i32(v: &VARIANT) -> Option<i32> {
    unsafe {
        let vt = v.Anonymous.Anonymous.vt;
        let anon = &v.Anonymous.Anonymous.Anonymous;
        if vt == VT_I4 {
            Some(anon.lVal)
        } else if vt == VT_I2 {
            Some(anon.iVal as i32)
        } else {
            None
        }
    }
}

/// Extract a string from a VARIANT.
pub fn variant_get_string(v: &VARIANT) -> Option<String> {
    unsafe {
        if v.Anonymous.Anonymous.vt == VT_BSTR {
            let bstr = &v.Anonymous.Anonymous.Anonymous.bstrVal;
            Some(bstr.to_string())
        } else {
            None
        }
    }
}

/// Extract an IDispatch from a VARIANT.
pub fn variant_get_dispatch(v: &VARIANT) -> Option<IDispatch> {
    unsafe {
        if v.Anonymous.Anonymous.vt == VT_DISPATCH {
            // pdispVal is ManuallyDrop<Option<IDispatch>>
            let opt_disp: &Option<IDispatch> = &v.Anonymous.Anonymous.Anonymous.pdispVal;
            opt_disp.clone()
        } else {
            None
        }
    }
}

/// Check if a VARIANT is empty or null.
pub fn variant_is_empty(v: &VARIANT) -> bool {
    unsafe {
        let vt = v.Anonymous.Anonymous.vt;
        vt == VT_EMPTY || vt == VT_NULL
    }
}

// -- DispatchObject --

/// A wrapper around an IDispatch COM object providing ergonomic access.
#[derive(Clone)]
pub struct DispatchObject {
    inner: IDispatch,
}

impl DispatchObject {
    /// Create a COM object from a ProgID string (e.g., "Excel.Application").
    pub fn create_from_progid(progid: &str) -> Result<Self, String> {
        unsafe {
            let hstr = HSTRING::from(progid);
            let clsid =
                CLSIDFromProgID(&hstr).map_err(|e| format!("CLSIDFromProgID failed: {e}"))?;
            let disp: IDispatch = CoCreateInstance(&clsid, None, CLSCTX_LOCAL_SERVER)
                .map_err(|e| format!("CoCreateInstance failed for '{progid}': {e}"))?;
            Ok(Self { inner: disp })
        }
    }

    /// Look up the DISPIDs for a member name followed by its argument names.
    fn get_dispids(&self, names: &[&str]) -> Result<Vec<i32>, String> {
        let wide: Vec<Vec<u16>> = names
            .iter()
            .map(|n| n.encode_utf16().chain(std::iter::once(0)).collect())
            .collect();
        let ptrs: Vec<PCWSTR> = wide.iter().map(|w| PCWSTR(w.as_ptr())).collect();
        let mut dispids = vec![0i32; names.len()];
        unsafe {
            self.inner
                .GetIDsOfNames(
                    &GUID::zeroed(),
                    ptrs.as_ptr(),
                    ptrs.len() as u32,
                    GetSystemDefaultLCID(),
                    dispids.as_mut_ptr(),
                )
                .map_err(|e| format!("GetIDsOfNames({}) failed: {e}", names.join(", ")))?;
        }
        Ok(dispids)
    }

    /// The single Invoke call every accessor goes through.
    ///
    /// `args` are in natural order. DISPPARAMS wants positional arguments
    /// reversed, with named arguments (matching `named` one to one) placed
    /// before them.
    fn invoke(
        &self,
        member: &str,
        dispid: i32,
        flags: DISPATCH_FLAGS,
        args: &[VARIANT],
        named: &[i32],
        want_result: bool,
    ) -> Result<VARIANT, String> {
        let mut rgvarg: Vec<VARIANT> = args.iter().rev().cloned().collect();
        let mut named: Vec<i32> = named.to_vec();
        let params = DISPPARAMS {
            rgvarg: if rgvarg.is_empty() {
                ptr::null_mut()
            } else {
                rgvarg.as_mut_ptr()
            },
            rgdispidNamedArgs: if named.is_empty() {
                ptr::null_mut()
            } else {
                named.as_mut_ptr()
            },
            cArgs: rgvarg.len() as u32,
            cNamedArgs: named.len() as u32,
        };
        let mut result = VARIANT::default();
        let mut except = EXCEPINFO::default();
        unsafe {
            self.inner
                .Invoke(
                    dispid,
                    &GUID::zeroed(),
                    GetSystemDefaultLCID(),
                    flags,
                    &params,
                    if want_result { Some(&mut result) } else { None },
                    Some(&mut except),
                    None,
                )
                .map_err(|e| format_invoke_error(e, &except, member))?;
        }
        Ok(result)
    }

    /// Get a property value. Equivalent to VB's `obj.PropertyName`.
    pub fn get_property(&self, name: &str) -> Result<VARIANT, String> {
        let dispid = self.get_dispids(&[name])?[0];
        self.invoke(name, dispid, DISPATCH_PROPERTYGET, &[], &[], true)
    }

    /// Set a property value. Equivalent to VB's `obj.PropertyName = value`.
    pub fn set_property(&self, name: &str, value: VARIANT) -> Result<(), String> {
        let dispid = self.get_dispids(&[name])?[0];
        self.invoke(
            name,
            dispid,
            DISPATCH_PROPERTYPUT,
            &[value],
            &[DISPID_PROPERTYPUT],
            false,
        )?;
        Ok(())
    }

    /// Invoke a method with positional arguments in natural order.
    pub fn invoke_method(&self, name: &str, args: &[VARIANT]) -> Result<VARIANT, String> {
        let dispid = self.get_dispids(&[name])?[0];
        self.invoke(name, dispid, DISPATCH_METHOD, args, &[], true)
    }

    /// Invoke a method with named arguments only, like VB's
    /// `obj.Method Arg1:=a, Arg2:=b`.
    pub fn invoke_named(&self, name: &str, args: &[(&str, VARIANT)]) -> Result<VARIANT, String> {
        let names: Vec<&str> = std::iter::once(name)
            .chain(args.iter().map(|(arg, _)| *arg))
            .collect();
        let dispids = self.get_dispids(&names)?;
        // Named arguments are passed in the same order as their DISPIDs
        let values: Vec<VARIANT> = args.iter().rev().map(|(_, v)| v.clone()).collect();
        self.invoke(name, dispids[0], DISPATCH_METHOD, &values, &dispids[1..], true)
    }

    /// Get a child object (property that returns an IDispatch).
    pub fn get_child(&self, name: &str) -> Result<DispatchObject, String> {
        let variant = self.get_property(name)?;
        extract_dispatch(&variant, name)
    }

    /// Invoke a method and extract the returned IDispatch object.
    pub fn invoke_child(&self, name: &str, args: &[VARIANT]) -> Result<DispatchObject, String> {
        let variant = self.invoke_method(name, args)?;
        extract_dispatch(&variant, name)
    }

    /// Get a property that's indexed (e.g., `Worksheets(1)`).
    pub fn get_indexed(&self, name: &str, index: &VARIANT) -> Result<DispatchObject, String> {
        let dispid = self.get_dispids(&[name])?[0];
        let result = self.invoke(
            name,
            dispid,
            DISPATCH_PROPERTYGET,
            std::slice::from_ref(index),
            &[],
            true,
        )?;
        extract_dispatch(&result, name)
    }
}

/// Extract an IDispatch from a VARIANT, with a descriptive error.
fn extract_dispatch(variant: &VARIANT, context: &str) -> Result<DispatchObject, String> {
    if let Some(disp) = variant_get_dispatch(variant) {
        Ok(DispatchObject { inner: disp })
    } else if variant_is_empty(variant) {
        Err(format!("'{context}' returned empty/null"))
    } else {
        let vt = variant_vt(variant);
        Err(format!(
            "'{context}' returned non-object VARIANT (VT={vt}), expected VT_DISPATCH"
        ))
    }
}

/// Format an Invoke error, including EXCEPINFO details if available.
fn format_invoke_error(err: windows::core::Error, except: &EXCEPINFO, member_name: &str) -> String {
    let code = err.code().0 as u32;
    if code == DISP_E_EXCEPTION.0 as u32 {
        let desc = if !except.bstrDescription.is_empty() {
            except.bstrDescription.to_string()
        } else {
            String::from("(no description)")
        };
        format!("COM exception in '{member_name}': {desc}")
    } else {
        format!("Invoke('{member_name}') failed: {err}")
    }
}
