//! Data types for parsing and building the resource section.
//! The resource section contains the resource directory and the resource data.
//! See <https://learn.microsoft.com/en-us/windows/win32/debug/pe-format#the-rsrc-section> for more information.

use std::{borrow::Borrow, mem};

use ahash::RandomState;
use debug_ignore::DebugIgnore;
use indexmap::IndexMap;
use log::{trace, warn};
use zerocopy::IntoBytes;

use crate::{constants::*, errors::*, key::*, types::*, util::*};


/// Portable executable resource directory.
///
/// The directory is a tree of three levels: resource types, resource names and languages.
/// Leaves of the tree hold the raw resource data.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct ResourceDirectory {
    pub(crate) virtual_address: u32,
    pub(crate) root:            ResourceTable,
}
impl ResourceDirectory {
    /// Parse the resource directory from the given image at the given base address.
    /// The virtual address is used to resolve the resource data offsets and has to correspond to the virtual address in the section table header of the source image.
    ///
    /// # Returns
    /// Returns an error if the resource directory at the given address is invalid,
    /// nested deeper than three levels, or lists the same identifier twice in one table.
    pub fn parse(
        image: &[u8], base_address: u32, virtual_address: u32,
    ) -> Result<Self, ImageReadError> {
        let root = ResourceTable::parse(image, base_address, virtual_address, 0, 0)?;
        Ok(Self {
            virtual_address,
            root,
        })
    }

    /// Returns the virtual address of the resource directory in the source image.
    pub fn virtual_address(&self) -> u32 { self.virtual_address }

    /// Returns the root resource table.
    /// The root resource table contains one table per resource type.
    pub fn root(&self) -> &ResourceTable { &self.root }

    /// Returns the mutable root resource table.
    pub fn root_mut(&mut self) -> &mut ResourceTable { &mut self.root }

    /// Returns the size of the resulting resource directory in bytes.
    pub fn size(&self) -> u32 {
        self.root.tables_size()
            + aligned_to(self.root.strings_size(), 4)
            + self.root.descriptions_size()
            + self.root.data_size()
    }

    /// Build the resource directory into raw bytes to be included in an image.
    /// The virtual address is used to compute the resource data offsets and has to correspond to the virtual address in the section table header of the target image.
    pub fn build(&self, virtual_address: u32) -> Vec<u8> {
        let tables_size = self.root.tables_size();
        let strings_size = aligned_to(self.root.strings_size(), 4);
        let descriptions_size = self.root.descriptions_size();
        let mut builder = DirectoryBuilder {
            data: vec![0; self.size() as usize],
            virtual_address,
            next_table: self.root.header_size(),
            next_string: tables_size,
            next_description: tables_size + strings_size,
            next_data: tables_size + strings_size + descriptions_size,
        };
        builder.write_table(&self.root, 0);
        builder.data
    }

    /// Get the data of a resource.
    ///
    /// # Returns
    /// Returns `None` if the resource does not exist.
    pub fn get(&self, key: &ResourceKey) -> Option<&ResourceData> {
        self.root
            .get(&key.kind)?
            .as_table()?
            .get(&key.name)?
            .as_table()?
            .get(Identifier::from(key.language))?
            .as_data()
    }

    /// Insert or replace the data of a resource, creating missing type and name tables.
    /// A replaced resource keeps its codepage.
    ///
    /// # Returns
    /// Returns the replaced data, or an error if a numeric type or name exceeds 16 bits
    /// or the path to the resource is occupied by data instead of a table.
    pub fn insert(
        &mut self, key: &ResourceKey, data: Vec<u8>,
    ) -> Result<Option<Vec<u8>>, ResourceError> {
        key.check()?;
        let invalid = || ResourceError::InvalidTable(key.clone());
        let names = self.root.table_or_insert(&key.kind).ok_or_else(invalid)?;
        let languages = names.table_or_insert(&key.name).ok_or_else(invalid)?;
        let language = Identifier::from(key.language);
        match languages.get_mut(&language) {
            Some(ResourceEntry::Data(existing)) => Ok(Some(existing.replace_data(data))),
            Some(ResourceEntry::Table(_)) => Err(invalid()),
            None => {
                languages.insert(language, ResourceEntry::Data(ResourceData::new(data)));
                Ok(None)
            }
        }
    }

    /// Remove a resource, pruning name and type tables that are left empty.
    ///
    /// # Returns
    /// Returns the removed data, or an error if the resource does not exist.
    pub fn remove(&mut self, key: &ResourceKey) -> Result<ResourceData, ResourceError> {
        let missing = || ResourceError::Missing(key.clone());
        let names =
            self.root.get_mut(&key.kind).and_then(ResourceEntry::as_table_mut).ok_or_else(missing)?;
        let languages =
            names.get_mut(&key.name).and_then(ResourceEntry::as_table_mut).ok_or_else(missing)?;
        let language = Identifier::from(key.language);
        let removed = match languages.remove(&language) {
            Some(ResourceEntry::Data(data)) => data,
            Some(table) => {
                languages.insert(language, table);
                return Err(ResourceError::InvalidTable(key.clone()));
            }
            None => return Err(missing()),
        };
        if languages.is_empty() {
            names.remove(&key.name);
        }
        if names.is_empty() {
            self.root.remove(&key.kind);
        }
        Ok(removed)
    }

    /// Returns the keys of all resources in directory order.
    ///
    /// # Returns
    /// Returns an error if the directory is not a well-formed three level tree of types, names and languages.
    pub fn keys(&self) -> Result<Vec<ResourceKey>, ResourceError> {
        let mut keys = Vec::new();
        for (kind, names) in self.root.entries.iter() {
            let names = names
                .as_table()
                .ok_or_else(|| ResourceError::Malformed(format!("type {} holds data", kind)))?;
            for (name, languages) in names.entries.iter() {
                let languages = languages.as_table().ok_or_else(|| {
                    ResourceError::Malformed(format!("resource {} of type {} holds data", name, kind))
                })?;
                for (language, entry) in languages.entries.iter() {
                    let language =
                        language.as_numeric().and_then(|id| LANGID::try_from(id).ok()).ok_or_else(|| {
                            ResourceError::Malformed(format!(
                                "{} is not a language of resource {} of type {}",
                                language, name, kind
                            ))
                        })?;
                    let key = ResourceKey::new(kind.clone(), name.clone(), language);
                    if entry.as_data().is_none() {
                        return Err(ResourceError::InvalidTable(key));
                    }
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }
}

struct DirectoryBuilder {
    data:             Vec<u8>,
    virtual_address:  u32,
    next_table:       u32,
    next_string:      u32,
    next_description: u32,
    next_data:        u32,
}
impl DirectoryBuilder {
    // Tables of a level are allocated when their parent is written, so the tables region is filled
    // parent before children. Strings, descriptions and data follow in their own regions.
    fn write_table(&mut self, table: &ResourceTable, offset: u32) {
        let mut header = table.data;
        header.number_of_name_entries = table.named_count() as u16;
        header.number_of_id_entries = (table.entries.len() - table.named_count()) as u16;
        write_at(&mut self.data, offset as usize, header.as_bytes());

        let mut children = Vec::new();
        for (index, (name, entry)) in table.entries.iter().enumerate() {
            let name_offset_or_integer_id = match name.to_directory_string() {
                Some(string) => {
                    let string_offset = self.next_string;
                    write_at(&mut self.data, string_offset as usize, &string);
                    self.next_string += string.len() as u32;
                    string_offset | RESOURCE_ENTRY_HIGH_BIT
                }
                None => name.as_numeric().unwrap_or_default(),
            };
            let data_entry_or_subdirectory_offset = match entry {
                ResourceEntry::Table(child) => {
                    let child_offset = self.next_table;
                    self.next_table += child.header_size();
                    children.push((child, child_offset));
                    child_offset | RESOURCE_ENTRY_HIGH_BIT
                }
                ResourceEntry::Data(data) => {
                    let description_offset = self.next_description;
                    let description = ResourceDataEntry {
                        data_rva: self.virtual_address + self.next_data,
                        size:     data.data.len() as u32,
                        codepage: data.codepage,
                        reserved: data.reserved,
                    };
                    write_at(&mut self.data, description_offset as usize, description.as_bytes());
                    write_at(&mut self.data, self.next_data as usize, &data.data);
                    self.next_description += 16;
                    self.next_data += aligned_to(data.data.len() as u32, 8);
                    description_offset
                }
            };
            let entry = ResourceDirectoryEntry {
                name_offset_or_integer_id,
                data_entry_or_subdirectory_offset,
            };
            write_at(&mut self.data, (offset + 16 + index as u32 * 8) as usize, entry.as_bytes());
        }

        for (child, child_offset) in children {
            self.write_table(child, child_offset);
        }
    }
}

/// Portable executable resource table.
///
/// Entries are kept in resource directory order: named entries first, then numeric entries.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct ResourceTable {
    pub(crate) data:    ResourceDirectoryTable,
    pub(crate) entries: IndexMap<Identifier, ResourceEntry, RandomState>,
}
impl ResourceTable {
    fn parse(
        image: &[u8], base_address: u32, virtual_address: u32, directory_offset: u32, level: usize,
    ) -> Result<Self, ImageReadError> {
        let table_offset = base_address as u64 + directory_offset as u64;
        let table = read_at::<ResourceDirectoryTable>(image, table_offset)?;
        trace!("{} {:#x?}", "--".repeat(level + 1), table);

        let mut entries = IndexMap::with_hasher(RandomState::new());
        let count = table.number_of_name_entries as u64 + table.number_of_id_entries as u64;
        for index in 0..count {
            let entry = read_at::<ResourceDirectoryEntry>(image, table_offset + 16 + index * 8)?;
            trace!("{} {:#x?}", "--".repeat(level + 1), entry);
            let name_field = entry.name_offset_or_integer_id;
            let offset_field = entry.data_entry_or_subdirectory_offset;

            let name = if name_field & RESOURCE_ENTRY_HIGH_BIT != 0 {
                let name_offset = base_address as u64 + (name_field ^ RESOURCE_ENTRY_HIGH_BIT) as u64;
                let name_data = slice_at(image, name_offset, 2)?;
                let length = read::<u16>(name_data)? as u64;
                Identifier::from_directory_string(slice_at(image, name_offset, 2 + length * 2)?)?
            } else {
                Identifier::Numeric(name_field)
            };

            let resource = if offset_field & RESOURCE_ENTRY_HIGH_BIT != 0 {
                if level + 1 >= RESOURCE_DIRECTORY_LEVELS {
                    return Err(ImageReadError::InvalidSection(format!(
                        "resource table {} nested deeper than {} levels",
                        name, RESOURCE_DIRECTORY_LEVELS
                    )));
                }
                ResourceEntry::Table(ResourceTable::parse(
                    image,
                    base_address,
                    virtual_address,
                    offset_field ^ RESOURCE_ENTRY_HIGH_BIT,
                    level + 1,
                )?)
            } else {
                ResourceEntry::Data(ResourceData::parse(
                    image,
                    base_address,
                    virtual_address,
                    offset_field,
                    level,
                )?)
            };

            if entries.insert(name.clone(), resource).is_some() {
                return Err(ImageReadError::InvalidSection(format!(
                    "resource entry {} listed more than once in one table",
                    name
                )));
            }
        }
        Ok(Self {
            data: table,
            entries,
        })
    }

    /// Get a resource entry from the table.
    pub fn get<N: Borrow<Identifier>>(&self, name: N) -> Option<&ResourceEntry> {
        self.entries.get(name.borrow())
    }

    /// Get a mutable resource entry from the table.
    pub fn get_mut<N: Borrow<Identifier>>(&mut self, name: N) -> Option<&mut ResourceEntry> {
        self.entries.get_mut(name.borrow())
    }

    /// Insert a resource entry into the table.
    /// If an entry with the given name already exists, it will be replaced.
    /// # Returns
    /// The replaced entry.
    pub fn insert<N: Borrow<Identifier>>(
        &mut self, name: N, entry: ResourceEntry,
    ) -> Option<ResourceEntry> {
        let replaced = self.entries.insert(name.borrow().clone(), entry);
        if replaced.is_none() {
            self.entries.sort_keys();
            self.update_counts();
        }
        replaced
    }

    /// Remove a resource entry from the table.
    /// # Returns
    /// The removed entry.
    pub fn remove<N: Borrow<Identifier>>(&mut self, name: N) -> Option<ResourceEntry> {
        let removed = self.entries.shift_remove(name.borrow());
        if removed.is_some() {
            self.update_counts();
        }
        removed
    }

    /// Returns the names of the entries in the table.
    pub fn entries(&self) -> Vec<&Identifier> { self.entries.keys().collect() }

    /// Returns whether the table has no entries.
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Returns the complete size of the table, its resources and its children in the resource table.
    pub fn size(&self) -> u32 {
        self.tables_size() + self.strings_size() + self.descriptions_size() + self.data_size()
    }

    /// Returns the size of the table and its children in the resource table.
    pub fn tables_size(&self) -> u32 {
        self.header_size()
            + self
                .entries
                .values()
                .filter_map(ResourceEntry::as_table)
                .map(ResourceTable::tables_size)
                .sum::<u32>()
    }

    /// Returns the size of the strings in the entry and its children in the resource table.
    pub fn strings_size(&self) -> u32 {
        self.entries
            .iter()
            .map(|(name, entry)| {
                name.directory_string_size()
                    + entry.as_table().map(ResourceTable::strings_size).unwrap_or(0)
            })
            .sum::<u32>()
    }

    /// Returns the size of the data descriptions of the table and its children in the resource table.
    pub fn descriptions_size(&self) -> u32 {
        self.entries
            .values()
            .map(|entry| match entry {
                ResourceEntry::Table(table) => table.descriptions_size(),
                ResourceEntry::Data(_) => 16,
            })
            .sum::<u32>()
    }

    /// Returns the size of the data of the table and its children in the resource table.
    /// Each resource is padded to 8 bytes.
    pub fn data_size(&self) -> u32 {
        self.entries
            .values()
            .map(|entry| match entry {
                ResourceEntry::Table(table) => table.data_size(),
                ResourceEntry::Data(data) => aligned_to(data.data.len() as u32, 8),
            })
            .sum::<u32>()
    }

    // table header and its entries, without children
    fn header_size(&self) -> u32 { 16 + self.entries.len() as u32 * 8 }

    fn named_count(&self) -> usize { self.entries.keys().filter(|name| !name.is_numeric()).count() }

    fn update_counts(&mut self) {
        let named = self.named_count();
        self.data.number_of_name_entries = named as u16;
        self.data.number_of_id_entries = (self.entries.len() - named) as u16;
    }

    fn table_or_insert(&mut self, name: &Identifier) -> Option<&mut ResourceTable> {
        if !self.entries.contains_key(name) {
            self.insert(name, ResourceEntry::Table(ResourceTable::default()));
        }
        self.get_mut(name)?.as_table_mut()
    }
}

/// Raw resource data.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct ResourceData {
    data:     DebugIgnore<Vec<u8>>,
    codepage: u32,
    reserved: u32,
}
impl ResourceData {
    /// Create resource data with the default codepage.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data:     data.into(),
            codepage: 0,
            reserved: 0,
        }
    }

    fn parse(
        image: &[u8], base_address: u32, virtual_address: u32, description_offset: u32,
        level: usize,
    ) -> Result<Self, ImageReadError> {
        let description =
            read_at::<ResourceDataEntry>(image, base_address as u64 + description_offset as u64)?;
        let (data_rva, size) = (description.data_rva, description.size);

        // calculate as i64 and convert to u64 first to check for padding
        let address = base_address as i64 + data_rva as i64 - virtual_address as i64;
        let mut address = address as u64;
        if address & 0xffffffffff000000 == 0xffffffffff000000 {
            warn!(
                "{} resource data entry address {:#x?} seems to be packed, ignoring padding",
                "--".repeat(level + 1),
                address
            );
            address ^= 0xffffffffff000000;
        }
        trace!("{} {:#x?} {:#x?}", "--".repeat(level + 1), address, description);

        let data = slice_at(image, address, size as u64).map_err(|_| {
            ImageReadError::InvalidSection(format!(
                "resource data at {:#x} with size {:#x} outside image ({:#x})",
                address,
                size,
                image.len()
            ))
        })?;
        Ok(Self {
            data:     data.to_vec().into(),
            codepage: description.codepage,
            reserved: description.reserved,
        })
    }

    /// Returns the raw data.
    pub fn data(&self) -> &[u8] { &self.data }

    /// Returns the codepage of the data.
    pub fn codepage(&self) -> u32 { self.codepage }

    /// Set the raw data.
    pub fn set_data(&mut self, data: Vec<u8>) { self.data = data.into(); }

    /// Set the codepage of the data.
    pub fn set_codepage(&mut self, codepage: u32) { self.codepage = codepage; }

    /// Consume the resource and return the raw data.
    pub fn into_data(self) -> Vec<u8> { self.data.0 }

    fn replace_data(&mut self, data: Vec<u8>) -> Vec<u8> { mem::replace(&mut self.data.0, data) }
}

/// Resource entry in a resource table.
/// This can be either a child table or raw data.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ResourceEntry {
    Table(ResourceTable),
    Data(ResourceData),
}
impl ResourceEntry {
    /// Returns the child table, or `None` for data entries.
    pub fn as_table(&self) -> Option<&ResourceTable> {
        match self {
            ResourceEntry::Table(table) => Some(table),
            ResourceEntry::Data(_) => None,
        }
    }

    /// Returns the mutable child table, or `None` for data entries.
    pub fn as_table_mut(&mut self) -> Option<&mut ResourceTable> {
        match self {
            ResourceEntry::Table(table) => Some(table),
            ResourceEntry::Data(_) => None,
        }
    }

    /// Returns the raw data, or `None` for table entries.
    pub fn as_data(&self) -> Option<&ResourceData> {
        match self {
            ResourceEntry::Table(_) => None,
            ResourceEntry::Data(data) => Some(data),
        }
    }
}
