//! Windows API and binary constants.

#![allow(non_upper_case_globals)]

pub type DWORD = u32;
pub type WORD = u16;
pub type LANGID = WORD;


// https://docs.microsoft.com/en-us/openspecs/windows_protocols/ms-lcid/a9eac961-e77d-41a6-90a5-ce1a8b0cdb9c
pub const LANGUAGE_ID_NEUTRAL: LANGID = 0; // 0x0000, LANG_NEUTRAL
pub const LANGUAGE_ID_EN_US: LANGID = 1033; // 0x0409, en-US


// https://docs.microsoft.com/en-us/windows/win32/debug/pe-format

pub const PE_DOS_MAGIC: WORD = 0x5a4d; // MZ
pub const PE_PTR_OFFSET: DWORD = 0x03c;
pub const PE_NT_SIGNATURE: DWORD = 0x00004550; // PE00
pub const PE_32_MAGIC: WORD = 0x010b;
pub const PE_64_MAGIC: WORD = 0x020b;


// https://docs.microsoft.com/en-us/windows/win32/menurc/resource-types

pub const RT_CURSOR: WORD = 0x01;
pub const RT_BITMAP: WORD = 0x02;
pub const RT_ICON: WORD = 0x03;
pub const RT_MENU: WORD = 0x04;
pub const RT_DIALOG: WORD = 0x05;
pub const RT_STRING: WORD = 0x06;
pub const RT_FONTDIR: WORD = 0x07;
pub const RT_FONT: WORD = 0x08;
pub const RT_ACCELERATOR: WORD = 0x09;
pub const RT_RCDATA: WORD = 0x0A;
pub const RT_MESSAGETABLE: WORD = 0x0B;
pub const RT_GROUP_CURSOR: WORD = 0x0C;
pub const RT_GROUP_ICON: WORD = 0x0E;
pub const RT_VERSION: WORD = 0x10;
pub const RT_DLGINCLUDE: WORD = 0x11;
pub const RT_PLUGPLAY: WORD = 0x13;
pub const RT_VXD: WORD = 0x14;
pub const RT_ANICURSOR: WORD = 0x15;
pub const RT_ANIICON: WORD = 0x16;
pub const RT_HTML: WORD = 0x17;
pub const RT_MANIFEST: WORD = 0x18;

/// Returns the symbolic name of a predefined resource type.
pub const fn resource_type_name(id: u32) -> Option<&'static str> {
    Some(match id {
        0x01 => "RT_CURSOR",
        0x02 => "RT_BITMAP",
        0x03 => "RT_ICON",
        0x04 => "RT_MENU",
        0x05 => "RT_DIALOG",
        0x06 => "RT_STRING",
        0x07 => "RT_FONTDIR",
        0x08 => "RT_FONT",
        0x09 => "RT_ACCELERATOR",
        0x0A => "RT_RCDATA",
        0x0B => "RT_MESSAGETABLE",
        0x0C => "RT_GROUP_CURSOR",
        0x0E => "RT_GROUP_ICON",
        0x10 => "RT_VERSION",
        0x11 => "RT_DLGINCLUDE",
        0x13 => "RT_PLUGPLAY",
        0x14 => "RT_VXD",
        0x15 => "RT_ANICURSOR",
        0x16 => "RT_ANIICON",
        0x17 => "RT_HTML",
        0x18 => "RT_MANIFEST",
        _ => return None,
    })
}


// https://docs.microsoft.com/en-us/windows/win32/debug/pe-format#section-flags

pub const IMAGE_SCN_CNT_CODE: DWORD = 0x00000020;
pub const IMAGE_SCN_CNT_INITIALIZED_DATA: DWORD = 0x00000040;
pub const IMAGE_SCN_MEM_EXECUTE: DWORD = 0x20000000;
pub const IMAGE_SCN_MEM_READ: DWORD = 0x40000000;
pub const IMAGE_SCN_MEM_WRITE: DWORD = 0x80000000;


// https://learn.microsoft.com/en-us/windows/win32/debug/pe-format#the-rsrc-section

/// High bit of a resource directory entry marking a name string or a subdirectory offset.
pub const RESOURCE_ENTRY_HIGH_BIT: DWORD = 0x80000000;
/// Directory depth of a well-formed resource tree: type, name and language tables.
pub const RESOURCE_DIRECTORY_LEVELS: usize = 3;
