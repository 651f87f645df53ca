//! Portable executable image representation.
//!
//! See <https://learn.microsoft.com/en-us/windows/win32/debug/pe-format> for more information.

use std::borrow::Cow;

use ahash::RandomState;
use indexmap::IndexMap;
use log::{debug, info, warn};
use zerocopy::IntoBytes;

use crate::{constants::*, errors::*, resource::*, types::*, util::*};

/// Image data directory type enumeration.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum DataDirectoryType {
    ExportTable,
    ImportTable,
    ResourceTable,
    ExceptionTable,
    CertificateTable,
    BaseRelocationTable,
    Debug,
    Architecture,
    GlobalPtr,
    TLSTable,
    LoadConfigTable,
    BoundImport,
    IAT,
    DelayImportDescriptor,
    CLRRuntimeHeader,
    Reserved,
}
impl DataDirectoryType {
    /// Data directories in the order of the optional header.
    pub const ALL: [DataDirectoryType; 16] = {
        use DataDirectoryType::*;
        [
            ExportTable,
            ImportTable,
            ResourceTable,
            ExceptionTable,
            CertificateTable,
            BaseRelocationTable,
            Debug,
            Architecture,
            GlobalPtr,
            TLSTable,
            LoadConfigTable,
            BoundImport,
            IAT,
            DelayImportDescriptor,
            CLRRuntimeHeader,
            Reserved,
        ]
    };
}

/// Portable executable image representation.
///
/// Only the parts needed to locate and replace the resource directory are parsed;
/// everything else is carried over byte for byte.
#[derive(Debug, Clone)]
pub struct Image<'a> {
    pub(crate) image: Cow<'a, [u8]>,

    pub(crate) coff_header:      CoffHeader,
    pub(crate) standard_header:  StandardHeader,
    pub(crate) windows_header:   GenericWindowsHeader,
    pub(crate) data_directories: IndexMap<DataDirectoryType, ImageDataDirectory, RandomState>,
    pub(crate) section_table:    Vec<SectionHeader>,

    pub(crate) resource_directory: Option<ResourceDirectory>,

    coff_header_offset:     u64,
    windows_header_offset:  u64,
    data_directory_offset:  u64,
    data_directory_slots:   u64,
    section_table_offset:   u64,
}

impl PartialEq for Image<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.coff_header == other.coff_header
            && self.standard_header == other.standard_header
            && self.windows_header == other.windows_header
            && self.data_directories == other.data_directories
            && self.section_table == other.section_table
            && self.resource_directory == other.resource_directory
    }
}
impl Eq for Image<'_> {}

/// Where a rebuilt resource directory is placed.
enum Placement {
    /// Rewrite the existing resource section at the given index of the section table.
    InPlace { index: usize, last: bool },
    /// Append a new section after all existing sections.
    Append,
}

impl<'a> Image<'a> {
    /// Parse a portable executable image from a byte slice.
    ///
    /// # Returns
    /// Returns the `Image`, or an error if the byte slice is not a valid portable executable image, is truncated or is missing required headers.
    pub fn parse<R: Into<Cow<'a, [u8]>>>(image: R) -> Result<Self, ImageReadError> {
        let image = image.into();

        let pe_dos_magic = read_at::<u16>(&image, 0)?;
        debug!("pe_dos_magic: {:#x?}", pe_dos_magic);
        if pe_dos_magic != PE_DOS_MAGIC {
            return Err(ImageReadError::InvalidHeader("no dos magic".into()));
        }

        let pe_signature_offset = read_at::<u32>(&image, PE_PTR_OFFSET as u64)? as u64;
        debug!("pe_signature_offset: {:#x?}", pe_signature_offset);

        let pe_signature = read_at::<u32>(&image, pe_signature_offset)?;
        debug!("pe_signature: {:#x?}", pe_signature);
        if pe_signature != PE_NT_SIGNATURE {
            return Err(ImageReadError::InvalidHeader("no pe signature".into()));
        }

        let coff_header_offset = pe_signature_offset + 4;
        let coff_header = read_at::<CoffHeader>(&image, coff_header_offset)?;
        debug!("{:#x?}: {:#x?}", coff_header_offset, coff_header);
        let size_of_optional_header = coff_header.size_of_optional_header as u64;

        let standard_header_offset = coff_header_offset + 20;
        let standard_header = read_at::<StandardHeader>(&image, standard_header_offset)?;
        debug!("{:#x?}: {:#x?}", standard_header_offset, standard_header);
        let magic = standard_header.magic;

        // PE32 carries an additional base of data field before the windows header
        let (windows_header_offset, windows_header, data_directory_offset) =
            if magic == PE_32_MAGIC && size_of_optional_header >= 96 {
                let offset = standard_header_offset + 28;
                let header = read_at::<WindowsHeader<u32>>(&image, offset)?;
                (offset, GenericWindowsHeader::WindowsHeader32(header), standard_header_offset + 96)
            } else if magic == PE_64_MAGIC && size_of_optional_header >= 112 {
                let offset = standard_header_offset + 24;
                let header = read_at::<WindowsHeader<u64>>(&image, offset)?;
                (offset, GenericWindowsHeader::WindowsHeader64(header), standard_header_offset + 112)
            } else {
                return Err(ImageReadError::InvalidHeader("invalid optional header".into()));
            };
        debug!("{:#x?}: {:#x?}", windows_header_offset, windows_header);

        let section_table_offset = standard_header_offset + size_of_optional_header;
        let data_directory_slots = (section_table_offset - data_directory_offset) / 8;
        let number_of_rva_and_sizes = windows_header.number_of_rva_and_sizes() as u64;
        if number_of_rva_and_sizes > data_directory_slots {
            return Err(ImageReadError::InvalidHeader(format!(
                "{} data directories do not fit in the optional header ({} slots)",
                number_of_rva_and_sizes, data_directory_slots
            )));
        }

        let mut data_directories = IndexMap::with_hasher(RandomState::new());
        for (index, &directory) in DataDirectoryType::ALL.iter().enumerate() {
            if (index as u64) < number_of_rva_and_sizes {
                let offset = data_directory_offset + index as u64 * 8;
                let data = read_at::<ImageDataDirectory>(&image, offset)?;
                debug!("{:#x?}: {:?}: {:#x?}", offset, directory, data);
                data_directories.insert(directory, data);
            }
        }

        let mut section_table = Vec::with_capacity(coff_header.number_of_sections as usize);
        for index in 0..coff_header.number_of_sections as u64 {
            let offset = section_table_offset + index * 40;
            let section_header = read_at::<SectionHeader>(&image, offset)?;
            debug!(
                "{:#x?}: {}: {:#x?}",
                offset,
                section_header.name().unwrap_or("?".to_string()),
                section_header
            );
            section_table.push(section_header);
        }

        let resource_section = data_directories
            .get(&DataDirectoryType::ResourceTable)
            .filter(|directory| directory.virtual_address > 0 && directory.size > 0)
            .and_then(|directory| {
                let virtual_address = directory.virtual_address;
                section_table.iter().find(|section| section.contains_virtual_address(virtual_address))
            });
        let resource_directory = match resource_section {
            Some(section) => {
                debug!(
                    "found resource directory in {} section: {:#x?}",
                    section.name().unwrap_or("?".to_string()),
                    section
                );
                Some(ResourceDirectory::parse(
                    &image,
                    section.pointer_to_raw_data,
                    section.virtual_address,
                )?)
            }
            None => None,
        };

        Ok(Self {
            image,
            coff_header,
            standard_header,
            windows_header,
            data_directories,
            section_table,
            resource_directory,
            coff_header_offset,
            windows_header_offset,
            data_directory_offset,
            data_directory_slots,
            section_table_offset,
        })
    }

    /// Parse a portable executable image from a file.
    ///
    /// # Returns
    /// Returns the `Image`, or an error if the file could not be read, is not a valid portable executable image or is missing required headers.
    pub fn parse_file<P: AsRef<std::path::Path>>(path: P) -> Result<Image<'static>, ImageReadError> {
        let data = std::fs::read(path)?;
        Image::parse(data)
    }

    /// Write the portable executable image to a file.
    ///
    /// # Returns
    /// Returns an error if the file could not be written.
    pub fn write_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), ImageWriteError> {
        std::fs::write(path, &self.image).map_err(|e| e.into())
    }

    /// Set the resource directory of the image.
    ///
    /// This will update the resource data directory and the resource section.
    /// The existing resource section is rewritten in place if no other data directory points into it and either
    /// the new directory fits into it or it is the last section of the image, in which case it is resized.
    /// Otherwise the existing section is kept intact and a new section is added after all other sections and before any trailing data.
    ///
    /// # Returns
    /// Returns the previous resource directory, or an error in the following cases:
    /// - There is not enough space in the image header to add a new section or data directory.
    /// - A section points to data outside the image.
    ///
    /// # Safety
    /// Replacing an existing resource directory may cause the resulting image to be invalid.
    /// Applications might reference data inside the resource directory that may not exist in the new one.
    ///
    /// Some packed images (e.g. packed with UPX) might not work with a modified resource directory or additional sections.
    pub fn set_resource_directory(
        &mut self, resource_directory: ResourceDirectory,
    ) -> Result<Option<ResourceDirectory>, ImageWriteError> {
        // copy to-be-modified data to allow erroring out without invalidating the image
        let mut coff_header = self.coff_header;
        let mut windows_header = self.windows_header;
        let mut data_directories = self.data_directories.clone();
        let mut section_table = self.section_table.clone();
        let file_alignment = windows_header.file_alignment();
        let section_alignment = windows_header.section_alignment();

        // ensure that the data directory entry for the resource table exists
        for &directory in &DataDirectoryType::ALL[..=2] {
            if !data_directories.contains_key(&directory) {
                debug!("adding missing header data directory: {:?}", directory);
                data_directories.insert(directory, ImageDataDirectory::default());
            }
        }
        if data_directories.len() as u64 > self.data_directory_slots {
            return Err(ImageWriteError::NotEnoughSpaceInHeader(
                data_directories.len() as u64 * 8,
                self.data_directory_slots * 8,
            ));
        }
        if self.data_directories.contains_key(&DataDirectoryType::CertificateTable)
            && self.data_directories[&DataDirectoryType::CertificateTable].size > 0
        {
            warn!("image is signed, updating resources invalidates the signature");
        }

        let raw_sections = || section_table.iter().filter(|section| section.size_of_raw_data > 0);
        let first_section_start = raw_sections()
            .map(|section| section.pointer_to_raw_data as u64)
            .min()
            .unwrap_or(self.image.len() as u64);
        let last_section_end =
            raw_sections().map(SectionHeader::raw_end).max().unwrap_or(self.image.len() as u64);
        if last_section_end > self.image.len() as u64 {
            return Err(ImageWriteError::InvalidSectionRange(
                last_section_end,
                self.image.len() as u64,
            ));
        }
        let last_virtual_end = section_table.iter().map(SectionHeader::virtual_end).max();

        let new_size = resource_directory.size();
        let placement = self.resource_placement(&section_table, &data_directories, new_size);

        let mut body = Vec::with_capacity(self.image.len() + new_size as usize);
        match placement {
            Placement::InPlace { index, last } => {
                let section = &mut section_table[index];
                let start = section.pointer_to_raw_data as u64;
                let end = section.raw_end();
                let mut data = resource_directory.build(section.virtual_address);
                if last {
                    debug!("rewriting last resource section, resizing to {:#x?}", new_size);
                    data.resize(aligned_to(new_size, file_alignment) as usize, 0);
                    section.size_of_raw_data = data.len() as u32;
                    section.virtual_size = new_size;
                } else {
                    debug!("rewriting resource section in place, keeping size {:#x?}", end - start);
                    // pad with the previous section data, other data might still point into it
                    data.extend_from_slice(&self.image[(start + new_size as u64) as usize..end as usize]);
                }
                body.extend_from_slice(&self.image[first_section_start as usize..start as usize]);
                body.extend_from_slice(&data);
                body.extend_from_slice(&self.image[end as usize..]);

                let directory = data_directories.get_mut(&DataDirectoryType::ResourceTable);
                if let Some(directory) = directory {
                    directory.virtual_address = section.virtual_address;
                    directory.size = new_size;
                }
            }
            Placement::Append => {
                let virtual_address = aligned_to(
                    last_virtual_end.unwrap_or(section_alignment as u64) as u32,
                    section_alignment,
                );
                let pointer_to_raw_data = aligned_to(last_section_end as u32, file_alignment);
                debug!(
                    "adding new resource section at {:#x?} (virtual address {:#x?})",
                    pointer_to_raw_data, virtual_address
                );
                let mut data = resource_directory.build(virtual_address);
                data.resize(aligned_to(new_size, file_alignment) as usize, 0);

                body.extend_from_slice(&self.image[first_section_start as usize..last_section_end as usize]);
                body.resize(body.len() + (pointer_to_raw_data as u64 - last_section_end) as usize, 0);
                body.extend_from_slice(&data);
                body.extend_from_slice(&self.image[last_section_end as usize..]);

                section_table.push(SectionHeader {
                    name: SectionHeader::encode_name(".rsrc"),
                    virtual_size: new_size,
                    virtual_address,
                    size_of_raw_data: data.len() as u32,
                    pointer_to_raw_data,
                    characteristics: IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ,
                    ..SectionHeader::default()
                });
                coff_header.number_of_sections += 1;

                let directory = data_directories.get_mut(&DataDirectoryType::ResourceTable);
                if let Some(directory) = directory {
                    directory.virtual_address = virtual_address;
                    directory.size = new_size;
                }
            }
        }

        let headers_end = self.section_table_offset + section_table.len() as u64 * 40;
        debug!("section table end: {:#x?}, first section start: {:#x?}", headers_end, first_section_start);
        if headers_end > first_section_start {
            return Err(ImageWriteError::NotEnoughSpaceInHeader(headers_end, first_section_start));
        }

        let size_of_image = aligned_to(
            section_table.iter().map(SectionHeader::virtual_end).max().unwrap_or_default() as u32,
            section_alignment,
        );
        windows_header.set_layout(size_of_image, data_directories.len() as u32);

        let mut new_image = Vec::with_capacity(first_section_start as usize + body.len());
        new_image.extend_from_slice(&self.image[..first_section_start as usize]);
        write_at(&mut new_image, self.coff_header_offset as usize, coff_header.as_bytes());
        write_at(&mut new_image, self.windows_header_offset as usize, windows_header.as_bytes());
        for (index, directory) in data_directories.values().enumerate() {
            let offset = self.data_directory_offset as usize + index * 8;
            write_at(&mut new_image, offset, directory.as_bytes());
        }
        for (index, section) in section_table.iter().enumerate() {
            let offset = self.section_table_offset as usize + index * 40;
            write_at(&mut new_image, offset, section.as_bytes());
        }
        new_image.extend_from_slice(&body);
        info!("rebuilt image with resource directory of {:#x?} bytes", new_size);

        self.coff_header = coff_header;
        self.windows_header = windows_header;
        self.data_directories = data_directories;
        self.section_table = section_table;
        self.image = new_image.into();

        Ok(self.resource_directory.replace(resource_directory))
    }

    fn resource_placement(
        &self, section_table: &[SectionHeader],
        data_directories: &IndexMap<DataDirectoryType, ImageDataDirectory, RandomState>,
        new_size: u32,
    ) -> Placement {
        let Some(resource_directory) = data_directories
            .get(&DataDirectoryType::ResourceTable)
            .filter(|directory| directory.size > 0)
        else {
            return Placement::Append;
        };
        let virtual_address = resource_directory.virtual_address;
        let Some(index) =
            section_table.iter().position(|section| section.contains_virtual_address(virtual_address))
        else {
            return Placement::Append;
        };
        let section = section_table[index];
        let section_name = section.name().unwrap_or("?".to_string());

        // the resource directory has to start the section to be rebuilt at the section address
        if virtual_address != section.virtual_address || section.size_of_raw_data == 0 {
            debug!("resource directory does not start the {} section", section_name);
            return Placement::Append;
        }
        for (directory, data) in data_directories.iter() {
            let data_address = data.virtual_address;
            if directory != &DataDirectoryType::ResourceTable
                && data_address > 0
                && section.contains_virtual_address(data_address)
            {
                info!("resource section also used by data directory {:?}", directory);
                warn!("resource section used by multiple data directories can indicate a packed executable");
                return Placement::Append;
            }
        }

        let last = section_table.iter().all(|other| {
            other.raw_end() <= section.raw_end() && other.virtual_end() <= section.virtual_end()
        });
        let fits = new_size <= section.size_of_raw_data && new_size <= section.virtual_size;
        if last {
            debug!("{} section is the last section and can be resized", section_name);
            Placement::InPlace { index, last }
        } else if fits {
            debug!("{} section is large enough and can be reused", section_name);
            Placement::InPlace { index, last }
        } else {
            debug!("{} section is too small and followed by other sections", section_name);
            Placement::Append
        }
    }

    /// Returns the current resource directory or `None` if the image does not contain a resource directory.
    pub fn resource_directory(&self) -> Option<&ResourceDirectory> {
        self.resource_directory.as_ref()
    }

    /// Returns the raw image data with all changes applied.
    pub fn data(&self) -> &[u8] { &self.image }

    /// Returns the parsed coff header.
    pub fn coff_header(&self) -> &CoffHeader { &self.coff_header }

    /// Returns the parsed windows header.
    pub fn windows_header(&self) -> &GenericWindowsHeader { &self.windows_header }

    /// Returns the data directory for the requested header.
    pub fn data_directory(&self, directory: DataDirectoryType) -> Option<&ImageDataDirectory> {
        self.data_directories.get(&directory)
    }

    /// Returns all section tables existing in the image.
    pub fn section_table(&self) -> &[SectionHeader] { &self.section_table }

    /// Returns the section header containing the data directory.
    pub fn section_header_for_data_directory(
        &self, directory: DataDirectoryType,
    ) -> Option<&SectionHeader> {
        let virtual_address = self.data_directory(directory)?.virtual_address;
        self.section_table.iter().find(|section| section.contains_virtual_address(virtual_address))
    }
}
