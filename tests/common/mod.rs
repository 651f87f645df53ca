#![allow(dead_code)]

use std::sync::Once;

use pesync::{constants::*, types::*, *};
use zerocopy::IntoBytes;

static INIT_LOGGER: Once = Once::new();
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::builder()
            .is_test(true)
            .filter_level(log::LevelFilter::Debug)
            .format_timestamp(None)
            .format_module_path(false)
            .format_level(true)
            .format_target(false)
            .write_style(env_logger::WriteStyle::Auto)
            .init();
    });
}

pub const FILE_ALIGNMENT: u32 = 0x200;
pub const SECTION_ALIGNMENT: u32 = 0x1000;
pub const SECTION_TABLE_OFFSET: usize = 0x138;
pub const NUMBER_OF_SECTIONS_OFFSET: usize = 0x46;

/// A PE32 image with a single `.text` section and no resources.
pub fn minimal_image() -> Vec<u8> {
    let mut image = vec![0u8; 0x40];
    image[0..2].copy_from_slice(&PE_DOS_MAGIC.to_le_bytes());
    image[0x3c..0x40].copy_from_slice(&0x40u32.to_le_bytes());
    image.extend_from_slice(&PE_NT_SIGNATURE.to_le_bytes());

    let coff_header = CoffHeader {
        machine: 0x014c,
        number_of_sections: 1,
        size_of_optional_header: 224,
        characteristics: 0x0102,
        ..Default::default()
    };
    image.extend_from_slice(coff_header.as_bytes());

    let standard_header = StandardHeader {
        magic: PE_32_MAGIC,
        size_of_code: 0x200,
        address_of_entry_point: 0x1000,
        base_of_code: 0x1000,
        ..Default::default()
    };
    image.extend_from_slice(standard_header.as_bytes());
    // base of data
    image.extend_from_slice(&0x2000u32.to_le_bytes());

    let windows_header = WindowsHeader::<u32> {
        image_base: 0x400000,
        section_alignment: SECTION_ALIGNMENT,
        file_alignment: FILE_ALIGNMENT,
        operating_system_version: VersionU16 { major: 6, minor: 0 },
        subsystem_version: VersionU16 { major: 6, minor: 0 },
        size_of_image: 0x2000,
        size_of_headers: 0x200,
        subsystem: 3,
        size_of_stack_reserve: 0x100000,
        size_of_stack_commit: 0x1000,
        size_of_heap_reserve: 0x100000,
        size_of_heap_commit: 0x1000,
        number_of_rva_and_sizes: 16,
        ..Default::default()
    };
    image.extend_from_slice(windows_header.as_bytes());
    for _ in 0..16 {
        image.extend_from_slice(ImageDataDirectory::default().as_bytes());
    }

    let text = SectionHeader {
        name: SectionHeader::encode_name(".text"),
        virtual_size: 0x1000,
        virtual_address: 0x1000,
        size_of_raw_data: 0x200,
        pointer_to_raw_data: 0x200,
        characteristics: IMAGE_SCN_CNT_CODE | IMAGE_SCN_MEM_EXECUTE | IMAGE_SCN_MEM_READ,
        ..Default::default()
    };
    image.extend_from_slice(text.as_bytes());
    assert_eq!(image.len(), SECTION_TABLE_OFFSET + 40);

    image.resize(0x200, 0);
    image.resize(0x400, 0xc3);
    image
}

/// A resource directory holding the given resources.
pub fn directory(resources: &[(ResourceKey, &[u8])]) -> ResourceDirectory {
    let mut directory = ResourceDirectory::default();
    for (key, data) in resources {
        directory.insert(key, data.to_vec()).unwrap();
    }
    directory
}

/// A PE32 image holding the given resources.
pub fn image_with_resources(resources: &[(ResourceKey, &[u8])]) -> Vec<u8> {
    let data = minimal_image();
    let mut image = Image::parse(&data[..]).unwrap();
    image.set_resource_directory(directory(resources)).unwrap();
    image.data().to_vec()
}

/// Append a section of the given size after all sections of the image.
pub fn append_section(data: Vec<u8>, name: &str, size: u32) -> Vec<u8> {
    let image = Image::parse(&data[..]).unwrap();
    let sections = image.section_table().to_vec();
    let last_virtual_end = sections.iter().map(SectionHeader::virtual_end).max().unwrap() as u32;
    let virtual_address = last_virtual_end.div_ceil(SECTION_ALIGNMENT) * SECTION_ALIGNMENT;
    let pointer_to_raw_data = (data.len() as u32).div_ceil(FILE_ALIGNMENT) * FILE_ALIGNMENT;
    let size_of_raw_data = size.div_ceil(FILE_ALIGNMENT) * FILE_ALIGNMENT;

    let section = SectionHeader {
        name: SectionHeader::encode_name(name),
        virtual_size: size,
        virtual_address,
        size_of_raw_data,
        pointer_to_raw_data,
        characteristics: IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ,
        ..Default::default()
    };
    let mut data = data;
    let offset = SECTION_TABLE_OFFSET + sections.len() * 40;
    data[offset..offset + 40].copy_from_slice(section.as_bytes());
    data[NUMBER_OF_SECTIONS_OFFSET..NUMBER_OF_SECTIONS_OFFSET + 2]
        .copy_from_slice(&(sections.len() as u16 + 1).to_le_bytes());
    data.resize(pointer_to_raw_data as usize, 0);
    data.resize((pointer_to_raw_data + size_of_raw_data) as usize, 0xee);
    data
}

pub fn icon_group(name: u32) -> ResourceKey { ResourceKey::new(RT_GROUP_ICON, name, LANGUAGE_ID_EN_US) }

pub fn icon(name: u32) -> ResourceKey { ResourceKey::new(RT_ICON, name, LANGUAGE_ID_EN_US) }

pub fn version() -> ResourceKey { ResourceKey::new(RT_VERSION, 1u32, LANGUAGE_ID_EN_US) }
