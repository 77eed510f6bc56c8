//! Field-mask transaction state
//!
//! [`SetDeviceState`] is the ledger of one Set call. It records which paths the
//! caller sets, which extra paths the engine writes or must fetch from storage,
//! and the checks that can only run once the stored record is known.
//!
//! A check registered through [`SetDeviceState::with_fields`] runs immediately
//! when every path it depends on is caller-set. Otherwise the missing paths are
//! added to the fetch set and the check is deferred until [`SetDeviceState::apply`]
//! receives the stored record.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::device::EndDevice;
use crate::error::{Error, Result};
use crate::mask;
use crate::path::{has_any_field, FieldPath, PathSet};

type Check = Box<dyn Fn(&FieldBag<'_>) -> Result<()> + Send + Sync>;

/// Deferred check with the paths it reads from the stored record
struct Deferred {
    stored_paths: Vec<FieldPath>,
    check: Check,
}

/// Read access to the record each dependency path resolves to
///
/// Paths registered as stored dependencies read from the stored record, every
/// other path reads from the request record.
pub struct FieldBag<'a> {
    request: &'a EndDevice,
    request_value: &'a Value,
    stored: &'a EndDevice,
    stored_value: &'a Value,
    stored_paths: &'a [FieldPath],
}

impl<'a> FieldBag<'a> {
    fn from_stored(&self, path: &FieldPath) -> bool {
        has_any_field(self.stored_paths, path)
    }

    /// Record holding the field at `path`
    pub fn device(&self, path: impl Into<FieldPath>) -> &'a EndDevice {
        if self.from_stored(&path.into()) {
            self.stored
        } else {
            self.request
        }
    }

    /// Serialized value at `path`
    pub fn value(&self, path: &FieldPath) -> Option<&'a Value> {
        let root = if self.from_stored(path) {
            self.stored_value
        } else {
            self.request_value
        };
        mask::get(root, path)
    }

    /// Whether the field at `path` is zero
    pub fn is_zero(&self, path: &FieldPath) -> bool {
        self.value(path).map_or(true, mask::is_zero)
    }
}

/// Ledger of one Set call over an end device
pub struct SetDeviceState {
    device: EndDevice,
    request_value: Option<Value>,

    paths: PathSet,
    extra_sets: PathSet,
    extra_gets: PathSet,

    zero_paths: BTreeMap<FieldPath, bool>,
    deferred: Vec<Deferred>,
}

impl SetDeviceState {
    /// State for writing `paths` of `device`
    pub fn new(device: EndDevice, paths: PathSet) -> Self {
        Self {
            device,
            request_value: None,
            paths,
            extra_sets: PathSet::new(),
            extra_gets: PathSet::new(),
            zero_paths: BTreeMap::new(),
            deferred: Vec::new(),
        }
    }

    /// Request record
    pub fn device(&self) -> &EndDevice {
        &self.device
    }

    /// Mutable request record
    pub fn device_mut(&mut self) -> &mut EndDevice {
        self.request_value = None;
        &mut self.device
    }

    /// Paths supplied by the caller
    pub fn paths(&self) -> &PathSet {
        &self.paths
    }

    fn request_value(&mut self) -> Result<&Value> {
        let value = match self.request_value.take() {
            Some(value) => value,
            None => self.device.to_value()?,
        };
        Ok(&*self.request_value.insert(value))
    }

    /// Whether the field at `path` of the request record is zero
    pub fn field_is_zero(&mut self, path: impl Into<FieldPath>) -> Result<bool> {
        let path = path.into();
        Ok(mask::field_is_zero(self.request_value()?, &path))
    }

    /// Whether `path` is covered by a caller-set or engine-set path
    pub fn has_set_field(&self, path: impl Into<FieldPath>) -> bool {
        let path = path.into();
        self.paths.has_field(&path) || self.extra_sets.has_field(&path)
    }

    /// Whether any of `paths` is set
    pub fn has_set_any<I, P>(&self, paths: I) -> bool
    where
        I: IntoIterator<Item = P>,
        P: Into<FieldPath>,
    {
        paths.into_iter().any(|p| self.has_set_field(p))
    }

    /// Whether `path` is covered by a caller path or a fetch path
    pub fn has_get_field(&self, path: impl Into<FieldPath>) -> bool {
        let path = path.into();
        self.paths.has_field(&path) || self.extra_gets.has_field(&path)
    }

    /// Mark `paths` as written by the engine
    pub fn add_set_fields<I, P>(&mut self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<FieldPath>,
    {
        for p in paths {
            let p = p.into();
            if !self.has_set_field(&p) {
                self.extra_sets.insert(p);
            }
        }
    }

    /// Mark `paths` as required from storage
    pub fn add_get_fields<I, P>(&mut self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<FieldPath>,
    {
        for p in paths {
            let p = p.into();
            if !self.has_get_field(&p) {
                self.extra_gets.insert(p);
            }
        }
    }

    /// Paths to write: caller paths followed by engine-set paths
    pub fn set_fields(&self) -> PathSet {
        self.paths.union(&self.extra_sets)
    }

    /// Paths to fetch: caller paths followed by required paths
    pub fn get_fields(&self) -> PathSet {
        self.paths.union(&self.extra_gets)
    }

    /// Run `f` over the records holding `paths`, now or once the stored record is known
    pub fn with_fields<I, P, F>(&mut self, paths: I, f: F) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: Into<FieldPath>,
        F: Fn(&FieldBag<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let stored_paths: Vec<FieldPath> = paths
            .into_iter()
            .map(Into::into)
            .filter(|p| !self.has_set_field(p))
            .collect();
        if stored_paths.is_empty() {
            let empty = EndDevice::default();
            let empty_value = Value::Null;
            self.request_value()?;
            let request_value = self.request_value.as_ref().unwrap_or(&empty_value);
            return f(&FieldBag {
                request: &self.device,
                request_value,
                stored: &empty,
                stored_value: &empty_value,
                stored_paths: &[],
            });
        }
        self.add_get_fields(stored_paths.iter());
        self.deferred.push(Deferred {
            stored_paths,
            check: Box::new(f),
        });
        Ok(())
    }

    /// Run `f` over the record holding `path`
    pub fn with_field<F>(&mut self, path: impl Into<FieldPath>, f: F) -> Result<()>
    where
        F: Fn(&EndDevice) -> Result<()> + Send + Sync + 'static,
    {
        let path = path.into();
        let key = path.clone();
        self.with_fields([path], move |bag| f(bag.device(&key)))
    }

    /// Fail on `path` unless `is_valid` holds for the record holding it
    pub fn validate_field<F>(&mut self, path: impl Into<FieldPath>, is_valid: F) -> Result<()>
    where
        F: Fn(&EndDevice) -> bool + Send + Sync + 'static,
    {
        let path = path.into();
        let field = path.clone();
        self.with_field(path, move |dev| {
            if is_valid(dev) {
                Ok(())
            } else {
                Err(Error::invalid_field(&field))
            }
        })
    }

    /// Fail on the path returned by `violation`, if any
    pub fn validate_fields<I, P, F>(&mut self, paths: I, violation: F) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: Into<FieldPath>,
        F: Fn(&FieldBag<'_>) -> Option<FieldPath> + Send + Sync + 'static,
    {
        self.with_fields(paths, move |bag| match violation(bag) {
            Some(path) => Err(Error::invalid_field(path)),
            None => Ok(()),
        })
    }

    /// Like [`Self::validate_fields`], but only when one of `paths` is set
    pub fn validate_set_fields<F>(&mut self, paths: &[&str], violation: F) -> Result<()>
    where
        F: Fn(&FieldBag<'_>) -> Option<FieldPath> + Send + Sync + 'static,
    {
        if !self.has_set_any(paths.iter().copied()) {
            return Ok(());
        }
        self.validate_fields(paths.iter().copied(), violation)
    }

    /// Fail on `path` if it is set and `is_valid` does not hold
    pub fn validate_set_field(&self, path: &str, is_valid: impl FnOnce() -> bool) -> Result<()> {
        if self.has_set_field(path) && !is_valid() {
            return Err(Error::invalid_field(path));
        }
        Ok(())
    }

    /// Fail on `path` with the cause returned by `check` if it is set
    pub fn validate_set_field_with_cause(
        &self,
        path: &str,
        check: impl FnOnce() -> Result<()>,
    ) -> Result<()> {
        if !self.has_set_field(path) {
            return Ok(());
        }
        check().map_err(|err| Error::invalid_field_with_cause(path, err))
    }

    fn expect_zero(&mut self, path: FieldPath, zero: bool) -> Result<()> {
        if self.has_set_field(&path) {
            let is_zero = mask::field_is_zero(self.request_value()?, &path);
            return match (zero, is_zero) {
                (true, false) => Err(Error::invalid_field_with_cause(&path, Error::field_not_zero(&path))),
                (false, true) => Err(Error::invalid_field_with_cause(&path, Error::field_is_zero(&path))),
                _ => Ok(()),
            };
        }
        match self.zero_paths.get(&path) {
            Some(expected) if *expected != zero => {
                panic!("path {:?} requested to be both zero and not zero", path)
            }
            Some(_) => {}
            None => {
                self.add_get_fields([&path]);
                self.zero_paths.insert(path, zero);
            }
        }
        Ok(())
    }

    /// Require the field at `path` to be zero
    pub fn validate_field_is_zero(&mut self, path: impl Into<FieldPath>) -> Result<()> {
        self.expect_zero(path.into(), true)
    }

    /// Require the field at `path` to be non-zero
    pub fn validate_field_is_not_zero(&mut self, path: impl Into<FieldPath>) -> Result<()> {
        self.expect_zero(path.into(), false)
    }

    /// Require every field of `paths` to be zero
    pub fn validate_fields_are_zero<I, P>(&mut self, paths: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: Into<FieldPath>,
    {
        paths
            .into_iter()
            .try_for_each(|p| self.validate_field_is_zero(p))
    }

    /// Require every field of `paths` to be non-zero
    pub fn validate_fields_are_not_zero<I, P>(&mut self, paths: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: Into<FieldPath>,
    {
        paths
            .into_iter()
            .try_for_each(|p| self.validate_field_is_not_zero(p))
    }

    /// Resolve every deferred check against `stored` and run `f`
    ///
    /// Pending zero expectations are checked first, then deferred checks in
    /// registration order. `f` receives the stored record, a copy of the
    /// request record and the write paths, which it may extend. The state is
    /// left untouched, so the call may be repeated when a transaction retries.
    pub fn apply<F>(&self, stored: Option<&EndDevice>, f: F) -> Result<(EndDevice, PathSet)>
    where
        F: FnOnce(Option<&EndDevice>, &mut EndDevice, &mut PathSet) -> Result<()>,
    {
        let empty = EndDevice::default();
        let stored_dev = stored.unwrap_or(&empty);
        let stored_value = match stored {
            Some(dev) => dev.to_value()?,
            None => Value::Null,
        };
        for (path, should_be_zero) in &self.zero_paths {
            if mask::field_is_zero(&stored_value, path) != *should_be_zero {
                return Err(Error::invalid_field(path));
            }
        }

        let request_value = self.device.to_value()?;
        for deferred in &self.deferred {
            (deferred.check)(&FieldBag {
                request: &self.device,
                request_value: &request_value,
                stored: stored_dev,
                stored_value: &stored_value,
                stored_paths: &deferred.stored_paths,
            })?;
        }

        let mut device = self.device.clone();
        let mut sets = self.set_fields();
        f(stored, &mut device, &mut sets)?;
        Ok((device, sets))
    }

    /// Reusable mutator over the stored record, for transaction bodies that may retry
    pub fn set_func<'s, F>(
        &'s self,
        f: F,
    ) -> impl Fn(Option<&EndDevice>) -> Result<(EndDevice, PathSet)> + 's
    where
        F: Fn(Option<&EndDevice>, &mut EndDevice, &mut PathSet) -> Result<()> + 's,
    {
        move |stored: Option<&EndDevice>| self.apply(stored, &f)
    }
}
