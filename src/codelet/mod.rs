//! Codelets: named kernels with per-device entry points, keyed by
//! operation and element type.

pub mod builtin;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{TesseraError, TesseraResult};
use crate::runtime::TileAccess;
use crate::tensor::{DType, DeviceKind, DeviceMask};

/// Kernel entry point. Buffers arrive in the order the task declared them.
pub type KernelFn = fn(&mut [TileAccess], &ScalarArgs) -> TesseraResult<()>;

/// Scalar arguments packed with a task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScalarArgs {
    pub dims: Vec<usize>,
    pub scalars: Vec<f64>,
    pub seed: u64,
}

impl ScalarArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dims(mut self, dims: &[usize]) -> Self {
        self.dims.extend_from_slice(dims);
        self
    }

    pub fn with_scalars(mut self, scalars: &[f64]) -> Self {
        self.scalars.extend_from_slice(scalars);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn dim(&self, index: usize) -> TesseraResult<usize> {
        self.dims.get(index).copied().ok_or(TesseraError::IndexOutOfRange {
            index,
            bound: self.dims.len(),
        })
    }

    pub fn scalar(&self, index: usize) -> TesseraResult<f64> {
        self.scalars.get(index).copied().ok_or(TesseraError::IndexOutOfRange {
            index,
            bound: self.scalars.len(),
        })
    }
}

/// One operation for one element type
#[derive(Clone)]
pub struct Codelet {
    name: String,
    dtype: DType,
    cpu: KernelFn,
    accelerator: Option<KernelFn>,
    allowed: DeviceMask,
}

impl Codelet {
    pub fn new(name: &str, dtype: DType, cpu: KernelFn) -> Self {
        Self {
            name: name.to_string(),
            dtype,
            cpu,
            accelerator: None,
            allowed: DeviceMask::ALL,
        }
    }

    pub fn with_accelerator(mut self, kernel: KernelFn) -> Self {
        self.accelerator = Some(kernel);
        self
    }

    /// Devices this codelet may ever run on
    pub fn with_allowed(mut self, mask: DeviceMask) -> Self {
        self.allowed = mask;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn allowed(&self) -> DeviceMask {
        self.allowed
    }

    pub fn has_accelerator(&self) -> bool {
        self.accelerator.is_some()
    }

    pub fn entry(&self, device: DeviceKind) -> Option<KernelFn> {
        match device {
            DeviceKind::Cpu => Some(self.cpu),
            DeviceKind::Accelerator => self.accelerator,
        }
    }
}

impl fmt::Debug for Codelet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codelet")
            .field("name", &self.name)
            .field("dtype", &self.dtype)
            .field("accelerator", &self.accelerator.is_some())
            .field("allowed", &self.allowed)
            .finish()
    }
}

/// Registry shared by all nodes of a process group.
///
/// Lookups are concurrent; registration and device restriction are rare
/// and take the write side.
pub struct CodeletRegistry {
    codelets: RwLock<HashMap<(String, DType), Arc<Codelet>>>,
    restriction: RwLock<DeviceMask>,
    op_restrictions: RwLock<HashMap<String, DeviceMask>>,
}

impl CodeletRegistry {
    pub fn new() -> Self {
        Self {
            codelets: RwLock::new(HashMap::new()),
            restriction: RwLock::new(DeviceMask::ALL),
            op_restrictions: RwLock::new(HashMap::new()),
        }
    }

    /// Registry holding every built-in operation for `f32` and `f64`
    pub fn with_builtin() -> TesseraResult<Self> {
        let registry = Self::new();
        builtin::register_all(&registry)?;
        Ok(registry)
    }

    pub fn register(&self, codelet: Codelet) -> TesseraResult<Arc<Codelet>> {
        let key = (codelet.name.clone(), codelet.dtype);
        let mut codelets = self.codelets.write();
        if codelets.contains_key(&key) {
            return Err(TesseraError::DuplicateRegistration {
                op: key.0,
                dtype: key.1,
            });
        }
        debug!(op = %codelet.name, dtype = %codelet.dtype, accelerator = codelet.has_accelerator(), "codelet registered");
        let codelet = Arc::new(codelet);
        codelets.insert(key, codelet.clone());
        Ok(codelet)
    }

    pub fn register_kernels(
        &self,
        op: &str,
        dtype: DType,
        cpu: KernelFn,
        accelerator: Option<KernelFn>,
    ) -> TesseraResult<Arc<Codelet>> {
        let mut codelet = Codelet::new(op, dtype, cpu);
        if let Some(kernel) = accelerator {
            codelet = codelet.with_accelerator(kernel);
        }
        self.register(codelet)
    }

    pub fn lookup(&self, op: &str, dtype: DType) -> TesseraResult<Arc<Codelet>> {
        self.codelets
            .read()
            .get(&(op.to_string(), dtype))
            .cloned()
            .ok_or_else(|| TesseraError::unsupported_type(op, dtype))
    }

    pub fn contains(&self, op: &str, dtype: DType) -> bool {
        self.codelets.read().contains_key(&(op.to_string(), dtype))
    }

    pub fn len(&self) -> usize {
        self.codelets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.codelets.read().is_empty()
    }

    /// Narrow the device families later submissions of every operation may
    /// target
    pub fn restrict_devices(&self, mask: DeviceMask) {
        *self.restriction.write() = mask;
    }

    pub fn restrict_op_devices(&self, op: &str, mask: DeviceMask) {
        self.op_restrictions.write().insert(op.to_string(), mask);
    }

    pub fn restore_devices(&self) {
        *self.restriction.write() = DeviceMask::ALL;
        self.op_restrictions.write().clear();
    }

    /// Devices a submission of `codelet` may currently use
    pub fn effective_mask(&self, codelet: &Codelet) -> DeviceMask {
        let mut mask = codelet.allowed.intersect(*self.restriction.read());
        if let Some(op_mask) = self.op_restrictions.read().get(&codelet.name) {
            mask = mask.intersect(*op_mask);
        }
        mask
    }
}

impl Default for CodeletRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut [TileAccess], _: &ScalarArgs) -> TesseraResult<()> {
        Ok(())
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_builtin_registration_logged_once() {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let registry = tracing::subscriber::with_default(subscriber, CodeletRegistry::with_builtin).unwrap();
        assert_eq!(registry.len(), 28);
        let output = String::from_utf8(log.0.lock().clone()).unwrap();
        assert_eq!(output.matches("built-in codelets registered").count(), 1);
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = CodeletRegistry::new();
        registry.register_kernels("noop", DType::F32, noop, None).unwrap();
        assert!(registry.contains("noop", DType::F32));
        assert!(registry.lookup("noop", DType::F32).is_ok());
        assert_eq!(
            registry.lookup("noop", DType::F64).unwrap_err(),
            TesseraError::unsupported_type("noop", DType::F64)
        );
    }

    #[test]
    fn test_duplicate_registration() {
        let registry = CodeletRegistry::new();
        registry.register(Codelet::new("noop", DType::F64, noop)).unwrap();
        assert!(matches!(
            registry.register(Codelet::new("noop", DType::F64, noop)),
            Err(TesseraError::DuplicateRegistration { .. })
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_device_restriction() {
        let registry = CodeletRegistry::new();
        let codelet = registry
            .register(Codelet::new("noop", DType::F32, noop).with_accelerator(noop))
            .unwrap();
        assert_eq!(registry.effective_mask(&codelet), DeviceMask::ALL);

        registry.restrict_devices(DeviceMask::CPU);
        assert_eq!(registry.effective_mask(&codelet), DeviceMask::CPU);

        registry.restore_devices();
        registry.restrict_op_devices("noop", DeviceMask::ACCELERATOR);
        assert_eq!(registry.effective_mask(&codelet), DeviceMask::ACCELERATOR);
        registry.restrict_op_devices("other", DeviceMask::NONE);
        assert_eq!(registry.effective_mask(&codelet), DeviceMask::ACCELERATOR);

        let cpu_only = Codelet::new("cpu", DType::F32, noop).with_allowed(DeviceMask::CPU);
        registry.restore_devices();
        assert_eq!(registry.effective_mask(&cpu_only), DeviceMask::CPU);
    }

    #[test]
    fn test_scalar_args() {
        let args = ScalarArgs::new().with_dims(&[2, 3]).with_scalars(&[0.5]).with_seed(9);
        assert_eq!(args.dim(1).unwrap(), 3);
        assert_eq!(args.scalar(0).unwrap(), 0.5);
        assert!(args.scalar(1).is_err());
        assert_eq!(args.seed, 9);
    }

    #[test]
    fn test_builtin_registry() {
        let registry = CodeletRegistry::with_builtin().unwrap();
        for op in builtin::ALL_OPS {
            assert!(registry.contains(op, DType::F32), "{} f32", op);
            assert!(registry.contains(op, DType::F64), "{} f64", op);
            assert!(!registry.contains(op, DType::F16), "{} f16", op);
        }
    }
}
